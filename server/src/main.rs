use broker::{Broker, BrokerConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let config = match BrokerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid broker configuration");
            std::process::exit(1);
        }
    };

    let broker = match Broker::bind(config).await {
        Ok(broker) => broker,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind listeners");
            std::process::exit(1);
        }
    };

    tracing::info!(tcp = ?broker.tcp_addr(), ws = ?broker.ws_addr(), "switchboard broker listening");
    if let Err(e) = broker.serve().await {
        tracing::error!(error = %e, "broker stopped");
        std::process::exit(1);
    }
}
