// Upload one file to a go-fastdfs server.
//
// Usage:
//   cargo run --example deliver_file -- http://127.0.0.1:8080/upload ./report.txt

use dovecote_core::{ClientOptions, DovecoteClient, EndpointOptions, OutputFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dovecote_core=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let endpoint = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: deliver_file <endpoint> <file>"))?;
    let file = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: deliver_file <endpoint> <file>"))?;

    let name = std::path::Path::new(&file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.clone());
    let payload = std::fs::read(&file)?;

    let options = ClientOptions::new(
        EndpointOptions::new(endpoint.parse()?)
            .with_scene("default")
            .with_output(OutputFormat::Json),
    )
    .with_pool_cap(4);
    let client = DovecoteClient::new(options)?;

    let receipt = client.deliver(name, payload).await;
    match receipt.url() {
        Some(url) => println!("stored at {url}"),
        None => println!("delivery failed: {:?}", receipt.error),
    }

    Ok(())
}
