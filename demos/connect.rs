//! Open a named connection, run a query, and tear everything down.
//!
//! ```bash
//! RUST_LOG=mysqltest_conn=debug cargo run --example connect -- 127.0.0.1 root "" test
//! ```
//!
//! Arguments: host, user, password, database (all optional). The port comes
//! from `MYSQL_PORT` (default 4000).

use mysqltest_conn::{MySqlDriver, Registry, RegistryConfig, RetryPolicy};
use std::process::ExitCode;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mysqltest_conn=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".into());
    let user = args.next().unwrap_or_else(|| "root".into());
    let password = args.next().unwrap_or_default();
    let database = args.next().unwrap_or_else(|| "test".into());
    let port = std::env::var("MYSQL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(4000);

    let config = RegistryConfig::builder()
        .default_port(port)
        .retry_count(10)
        .retry(RetryPolicy::new(Duration::from_millis(500)).with_deadline(Duration::from_secs(30)))
        .build();
    let mut registry = Registry::new(MySqlDriver::new(), config);

    let cancel = registry.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let conn = match registry
        .add("default", &host, &user, &password, &database, None)
        .await
    {
        Ok(conn) => conn,
        Err(e) if e.is_unrecoverable() => {
            eprintln!("fatal: {}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(session) = conn.session_mut() {
        println!(
            "connected to {} (connection id {})",
            session.server_version(),
            session.connection_id()
        );
        match session.query("SELECT VERSION(), @@session.time_zone").await {
            Ok(results) => {
                for result in &results {
                    for row in 0..result.rows.len() {
                        let cells: Vec<&str> = (0..result.columns.len())
                            .map(|col| result.text(row, col).unwrap_or("NULL"))
                            .collect();
                        println!("{}", cells.join("\t"));
                    }
                }
            }
            Err(e) => eprintln!("query failed: {}", e),
        }
    }

    registry.close_all().await;
    ExitCode::SUCCESS
}
