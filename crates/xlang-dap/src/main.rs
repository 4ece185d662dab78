use clap::Parser;
use xlang_dap::Config;

fn main() -> miette::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    xlang_dap::start(Config::parse())
}
