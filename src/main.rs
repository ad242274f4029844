use std::process;

use room_relay::{Config, Server};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };

    let server = match Server::from_config(&config).await {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to open room storage: {}", e);
            process::exit(1);
        }
    };
    let routes = server.routes();

    log::info!("Starting {} application.", config.project_name);

    match &config.tls {
        Some(tls) if tls.cert_path.exists() && tls.key_path.exists() => {
            log::info!("listening on https://{}", config.bind_addr);
            warp::serve(routes)
                .tls()
                .cert_path(&tls.cert_path)
                .key_path(&tls.key_path)
                .run(config.bind_addr)
                .await;
        }
        tls => {
            if let Some(tls) = tls {
                log::warn!(
                    "certificate {} or key {} missing, falling back to plain HTTP",
                    tls.cert_path.display(),
                    tls.key_path.display()
                );
            }
            log::info!("listening on http://{}", config.bind_addr);
            warp::serve(routes).run(config.bind_addr).await;
        }
    }
}
