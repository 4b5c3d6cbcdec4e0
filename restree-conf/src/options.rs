use std::net::SocketAddr;

use structopt::StructOpt;

#[derive(Debug, Clone, Default, StructOpt)]
#[structopt(name = "restreed", about = "Resource-directory middleware server")]
pub struct Options {
    /// Configuration file name
    #[structopt(short = "f", long = "cfg")]
    pub cfg_name: Option<String>,

    /// HTTP API listen address, overrides the configuration file
    #[structopt(long = "http-laddr")]
    pub http_laddr: Option<SocketAddr>,
}
