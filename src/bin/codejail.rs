use anyhow::Result;

fn main() -> Result<()> {
    codejail::cli::run()
}
