use actix_request_identifier::{IdReuse, RequestIdentifier};
use actix_web::web::Data;
use anyhow::Context;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::config::Settings;
use crate::database::connect::{create_db_connection_pool, run_migrations};
use crate::notify::Notifier;
use crate::sweeper::Sweeper;

mod config;
mod database;
mod errors;
mod notify;
mod responses;
mod routes;
mod schema;
mod sweeper;
mod webhook;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    // setup tracing and use bunyan formatter
    let formatting_layer = BunyanFormattingLayer::new("stock-hold".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(LevelFilter::from_level(settings.log_level))
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber).context("failed to install tracing subscriber")?;

    let db = create_db_connection_pool(&settings).context("failed to create database pool")?;
    run_migrations(&db)?;

    let notifier = Notifier::new(settings.notify_url.clone()).context("failed to build notifier client")?;

    actix_web::rt::spawn(Sweeper::new(db.clone(), &settings).run());

    let bind_address = settings.bind_address.clone();
    let settings = Data::new(settings);
    let notifier = Data::new(notifier);
    let db = Data::new(db);

    let server = actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .wrap(TracingLogger::default())
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .app_data(db.clone())
            .app_data(settings.clone())
            .app_data(notifier.clone())
            .configure(routes::configure)
    });

    info!(bind_address = bind_address.as_str(), "starting http server");
    server
        .bind(&bind_address)
        .with_context(|| format!("failed to bind {bind_address}"))?
        .run()
        .await?;
    Ok(())
}
