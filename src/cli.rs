use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "seismic-proxy",
    version,
    about = "Caching proxy for the AFAD seismic event service"
)]
pub struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 3000)]
    pub port: u16,
    #[arg(long, default_value_t = false)]
    pub print_openapi: bool,
}
