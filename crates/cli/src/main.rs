use clap::Parser;
use netconf::{Server, ServerConfig};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "netconf-agent",
    about = "Standalone NETCONF agent for small devices"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:6513")]
    bind: String,

    /// Path of the persistent running configuration
    #[arg(long, default_value = "config.xml")]
    config: PathBuf,

    /// PEM certificate chain enabling the TLS listener
    #[cfg(feature = "tls")]
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for the TLS listener
    #[cfg(feature = "tls")]
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    #[allow(unused_mut)]
    let mut config = ServerConfig {
        datastore_path: args.config,
        ..Default::default()
    };

    #[cfg(feature = "tls")]
    if let (Some(cert_chain), Some(private_key)) = (args.tls_cert, args.tls_key) {
        config.tls = Some(netconf::TlsIdentity {
            cert_chain,
            private_key,
        });
    }

    let mut server = Server::with_config(&args.bind, config);

    if let Err(e) = server.start() {
        eprintln!("Failed to start agent: {}", e);
        return;
    }

    println!("NETCONF agent on {} — press Enter to stop", args.bind);
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    server.stop();
}
