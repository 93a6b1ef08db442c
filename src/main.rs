use std::{env, io, process};

use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use tpc_ledger::config::Config;
use tpc_ledger::csv::{read_commands, write_customers};
use tpc_ledger::service::Ledger;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .expect("usage: tpc-ledger <commands.csv>");

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = Config::from_env().unwrap_or_else(|e| {
        error!("{e}");
        process::exit(2);
    });

    let commands = read_commands(path.clone()).unwrap_or_else(|e| {
        error!(path, "{e}");
        process::exit(1);
    });

    let ledger = Ledger::new(config);
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    ledger.run(ReceiverStream::new(cmd_receiver)).await;

    let customers = match ledger.customers().customers().await {
        Ok(customers) => customers,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    if let Err(e) = write_customers(io::stdout().lock(), &customers) {
        error!("{e}");
        process::exit(1);
    }
}
