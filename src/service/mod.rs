pub mod http;

use std::sync::Arc;

use pingora_core::{
    listeners::tls::TlsSettings,
    server::{configuration::Opt, Server},
};

use crate::{
    config::{Config, Tls},
    core::{ErrorContext, PipelineResult},
    logging::Logger,
    orchestration::RequestPipeline,
};

pub use self::http::GraphQLHttpApp;

/// Assemble a pingora server: file log sink (when configured) and the
/// GraphQL HTTP service on every configured listener.
///
/// The returned server is bootstrapped; call `run_forever` on it.
pub fn build_server(
    config: Config,
    opt: Option<Opt>,
    pipeline: Arc<RequestPipeline>,
) -> PipelineResult<Server> {
    let logger = config.log.clone().map(Logger::new);
    match &logger {
        Some(logger) => logger.init_env_logger()?,
        None => {
            let _ = env_logger::try_init();
        }
    }

    let mut http_service = GraphQLHttpApp::graphql_http_service(&config, pipeline);

    // Add listeners from configuration
    log::info!("Adding listeners...");
    for list_cfg in &config.listeners {
        let address = list_cfg.address.to_string();
        match &list_cfg.tls {
            Some(Tls {
                cert_path,
                key_path,
            }) => {
                let mut settings = TlsSettings::intermediate(cert_path, key_path)
                    .with_context("Adding TLS listener failed")?;
                if list_cfg.offer_h2 {
                    settings.enable_h2();
                }
                http_service.add_tls_with_settings(&address, None, settings);
            }
            None => http_service.add_tcp(&address),
        }
    }

    let mut server = Server::new_with_opt_and_conf(opt, config.pingora);

    log::info!("Bootstrapping...");
    server.bootstrap();

    if let Some(logger) = logger {
        log::info!("Adding log sync service...");
        server.add_service(logger);
    }

    log::info!("Adding GraphQL HTTP service on {}", config.graphql.endpoint);
    server.add_service(http_service);

    Ok(server)
}
