use std::sync::Arc;

use polyport::config::Settings;
use polyport::{
    Error, HandlerError, SendFileOptions, Server, ServerOptions, ServerRequest, ServerResponse,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "polyport".to_owned());
    let settings = Settings::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.logging.filter.clone())),
        )
        .init();

    // Size the runtime from configuration before anything async runs.
    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(workers) = settings.server.workers {
        runtime.worker_threads(workers);
        tracing::info!(workers, "using configured worker threads");
    }

    runtime.build()?.block_on(run(settings))
}

async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let server = Arc::new(build_server(&settings)?);
    register_static_files(&server, &settings);

    let ports = server.listen(()).await?;
    tracing::info!(?ports, host = %server.host(), "serving HTTP and HTTPS on the same ports");

    shutdown_signal().await?;
    tracing::info!("shutting down");
    server.close().await;
    Ok(())
}

fn build_server(settings: &Settings) -> Result<Server, Box<dyn std::error::Error>> {
    let cert = settings
        .tls
        .cert_file
        .as_deref()
        .map(std::fs::read_to_string)
        .transpose()?;
    let key = settings
        .tls
        .key_file
        .as_deref()
        .map(std::fs::read_to_string)
        .transpose()?;

    let server = Server::new(ServerOptions {
        host: settings.bind_host()?,
        port: settings.server.port.clone(),
        use_available_port: settings.server.use_available_port,
        cert,
        key,
        ..ServerOptions::default()
    })?;
    Ok(server)
}

/// Serve files under the configured root for GET and HEAD requests,
/// leaving misses to the built-in 404.
fn register_static_files(server: &Server, settings: &Settings) {
    let options = SendFileOptions {
        from: settings.static_files.root.clone().into(),
        index: settings.static_files.index.clone(),
    };
    server.use_handler(
        move |request: ServerRequest, response: ServerResponse| {
            let options = options.clone();
            async move {
                if request.method() != hyper::Method::GET && request.method() != hyper::Method::HEAD
                {
                    return Ok(());
                }
                match response.send_file(&request, request.path(), &options).await {
                    Ok(()) => Ok(()),
                    Err(Error::Io(error)) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(error) => Err(HandlerError::from(error)),
                }
            }
        },
    );
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
