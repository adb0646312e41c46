use clap::Parser;

use forum_thread::cli::Cli;

fn main() {
    let cli = Cli::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = forum_thread::run(cli) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
