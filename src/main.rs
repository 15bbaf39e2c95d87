#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use devicecheck_server::{
    attest::AppAttestService,
    devicecheck::{AppleDeviceCheckGateway, DeviceTokenGateway},
    handlers::{configure_services, AppState},
    settings::DeviceCheckSettings,
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = DeviceCheckSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    let attest = AppAttestService::from_settings(&settings)
        .map_err(|e| std::io::Error::other(format!("Failed to initialize App Attest: {e:#}")))?;
    let gateway = AppleDeviceCheckGateway::from_settings(&settings).map_err(|e| {
        std::io::Error::other(format!("Failed to initialize DeviceCheck client: {e:#}"))
    })?;

    let state = AppState::new(
        Arc::new(attest),
        Arc::new(gateway) as Arc<dyn DeviceTokenGateway>,
        settings.expose_failure_details(),
    );
    start_server(state, settings).await
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(state: AppState, settings: DeviceCheckSettings) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    let cors_origins = settings.get_cors_origins();

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = if cors_origins.iter().any(|origin| origin == "*") {
            Cors::default().allow_any_origin()
        } else {
            Cors::default().allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
        };
        let cors = cors
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Authorization", "Content-Type", "Accept"])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &DeviceCheckSettings) {
    println!("Starting DeviceCheck server on http://{bind_address}");
    println!(
        "App: {} ({})",
        settings.app_identity().app_id(),
        settings.apple.environment
    );
    println!("DeviceCheck API: {}", settings.devicecheck_base_url());
    println!();
    println!("App Attest endpoints:");
    println!("  GET  /api/attest/challenge  - Issue a single-use challenge");
    println!("  POST /api/attest/validate   - Verify an attestation and register the key");
    println!("  POST /api/attest/assertion  - Verify an assertion for a registered key");
    println!();
    println!("DeviceCheck endpoints:");
    println!("  POST /api/device/query      - Read the two device bits");
    println!("  POST /api/device/update     - Set the two device bits");
    println!("  POST /api/device/validate   - Validate a device token");
    println!();
    println!("System endpoints:");
    println!("  GET  /                      - Version banner");
    println!("  GET  /health                - Health check");
}
