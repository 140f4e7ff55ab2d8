//! Minimal example of exposing a Prometheus endpoint for `bpf-prog-input` using `hyper`.
//!
//! More examples can be found using different HTTP libraries at https://github.com/prometheus/client_rust/blob/master/examples/hyper.rs.

use std::{
    future::Future,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    pin::Pin,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use bpf_prog_input::{BpfProgInput, KernelRegistry, OpenMetrics, ProgConfig};
use http_body_util::{combinators, BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    header,
    server::conn::http1,
    service::service_fn,
    Request, Response,
};
use hyper_util::rt::TokioIo;
use tokio::{
    net::TcpListener,
    pin,
    signal::unix::{signal, SignalKind},
};

/// Input and the registry it is gathered into.
struct Exporter {
    input: BpfProgInput<KernelRegistry>,
    metrics: OpenMetrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ProgConfig {
        code_size: true,
        statistics: true,
        ..Default::default()
    };
    let mut input = BpfProgInput::with_config(KernelRegistry, config);
    input.initialize();
    let exporter = Exporter {
        input,
        metrics: OpenMetrics::new(),
    };

    let endpoint = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8001);
    start_server(endpoint, exporter).await?;

    Ok(())
}

async fn start_server(endpoint: SocketAddr, exporter: Exporter) -> io::Result<()> {
    eprintln!("Starting metrics server on {endpoint}");

    let exporter = Arc::new(Mutex::new(exporter));

    let listener = TcpListener::bind(endpoint).await?;
    while let Ok((stream, _)) = listener.accept().await {
        let conn_builder = http1::Builder::new();
        let io = TokioIo::new(stream);
        let mut shutdown_stream = signal(SignalKind::terminate())?;

        let exporter = Arc::clone(&exporter);

        tokio::task::spawn(async move {
            let conn = conn_builder.serve_connection(io, service_fn(make_handler(exporter)));
            pin!(conn);
            tokio::select! {
                _ = conn.as_mut() => {}
                _ = shutdown_stream.recv() => {
                    conn.as_mut().graceful_shutdown();
                }
            }
        });
    }
    Ok(())
}

/// Boxed HTTP body for responses
type BoxBody = combinators::BoxBody<Bytes, hyper::Error>;

/// This function returns a HTTP handler (i.e. another function)
fn make_handler(
    exporter: Arc<Mutex<Exporter>>,
) -> impl Fn(Request<Incoming>) -> Pin<Box<dyn Future<Output = io::Result<Response<BoxBody>>> + Send>>
{
    // This closure accepts a request and responds with the OpenMetrics encoding of the programs
    // loaded at request time.
    move |_req: Request<Incoming>| {
        let exporter = Arc::clone(&exporter);

        Box::pin(async move {
            let mut buffer = String::new();
            {
                let mut guard = exporter
                    .lock()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "exporter poisoned"))?;
                let Exporter { input, metrics } = &mut *guard;
                input
                    .gather(metrics)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                metrics
                    .export(&mut buffer)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            }
            let body = full(Bytes::from(buffer));
            Response::builder()
                .header(
                    header::CONTENT_TYPE,
                    "application/openmetrics-text; version=1.0.0; charset=utf-8",
                )
                .body(body)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        })
    }
}

/// helper function to build a full boxed body
fn full(body: Bytes) -> BoxBody {
    Full::new(body).map_err(|never| match never {}).boxed()
}
