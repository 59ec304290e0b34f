use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    deid::cli::run_deid_cli(std::env::args().skip(1))
}
