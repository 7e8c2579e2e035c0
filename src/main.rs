//! freshtoken CLI binary entry point.

use freshtoken::cli::session::{
    handle_inspect, handle_refresh, handle_sign_in, handle_sign_out, handle_status, handle_watch,
    load_config, open_storage,
};
use freshtoken::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(cli.storage_dir.as_deref());
    match cli.command {
        Commands::Inspect(args) => handle_inspect(&args.token),
        Commands::Status => {
            let config = load_config(cli.config.as_deref(), None)?;
            handle_status(&config, storage)
        }
        Commands::SignIn(args) => {
            let config = load_config(cli.config.as_deref(), None)?;
            handle_sign_in(&config, storage, &args.token)
        }
        Commands::SignOut => {
            let config = load_config(cli.config.as_deref(), None)?;
            handle_sign_out(&config, storage)
        }
        Commands::Refresh(args) => {
            let config = load_config(cli.config.as_deref(), args.endpoint.as_deref())?;
            handle_refresh(&config, storage, args.cookie.as_deref()).await
        }
        Commands::Watch(args) => {
            let config = load_config(cli.config.as_deref(), args.endpoint.as_deref())?;
            handle_watch(&config, storage, args.cookie.as_deref()).await
        }
    }
}
