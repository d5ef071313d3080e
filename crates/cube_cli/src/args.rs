use clap::Parser;

/// cube-cli, the interactive Cube client
#[derive(Debug, Parser)]
#[command(name = "cube-cli", about = "Cube interactive client", version)]
pub struct Args {
    /// Server host
    #[arg(short = 'H', long, env = "CUBE_HOST", default_value = "localhost")]
    pub host: String,

    /// Server port
    #[arg(short = 'p', long, env = "CUBE_PORT", default_value_t = 4000)]
    pub port: u16,

    /// Client name sent as X-Client-Name (transactions are scoped to it)
    #[arg(short = 'n', long, env = "CUBE_CLIENT", default_value = "cube-cli")]
    pub client: String,

    /// Execute a single command and exit
    #[arg(short = 'c', long)]
    pub command: Option<String>,
}

impl Args {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
