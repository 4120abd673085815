use std::sync::Arc;

use airzone_cloud::{AirzoneClient, Config, EventListener};
use url::Url;

/// Run with: AIRZONE_EMAIL=... AIRZONE_PASSWORD=... \
///   cargo test --test integration -- --ignored
/// Talks to the real cloud; requires an account with at least one
/// installation.
fn config_from_env() -> Config {
    let email = std::env::var("AIRZONE_EMAIL").expect("AIRZONE_EMAIL not set");
    let password = std::env::var("AIRZONE_PASSWORD").expect("AIRZONE_PASSWORD not set");
    let mut config = Config::new(email, password);
    if let Ok(base) = std::env::var("AIRZONE_BASE_URL") {
        config.base_url = Some(Url::parse(&base).expect("invalid AIRZONE_BASE_URL"));
    }
    config
}

#[tokio::test]
#[ignore]
async fn login_and_list_installations() {
    let config = config_from_env();
    let client = AirzoneClient::from_config(&config);

    let token = client.login().await.expect("login failed");
    assert!(!token.is_empty());

    let installations = client.installations().await.expect("listing failed");
    assert!(!installations.is_empty(), "account has no installations");
    for installation in &installations {
        println!("{}: {}", installation.id, installation.name);
    }
}

#[tokio::test]
#[ignore]
async fn listen_first_installation_snapshot() {
    let config = config_from_env();
    let client = Arc::new(AirzoneClient::from_config(&config));
    let listener = EventListener::spawn(Arc::clone(&client), &config).expect("spawn failed");

    let installations = client.installations().await.expect("listing failed");
    let first = installations.first().expect("account has no installations");

    let statuses = listener
        .listen_installation(&first.id)
        .await
        .expect("listen failed");
    assert!(!statuses.is_empty(), "snapshot came back empty");
    for (device_id, status) in &statuses {
        println!("{device_id}: {status:?}");
    }

    listener.shutdown();
}
