use anyhow::Result;
use std::env;

pub(crate) struct Args {
    pub(crate) config_file: String,
    pub(crate) node_name: Option<String>,
    pub(crate) prom_exporter: Option<String>,
    pub(crate) advert_group: Option<String>,
    pub(crate) advert_port: Option<u16>,
}

impl Args {
    fn show_usage() {
        println!("Gantry Node Usage:");
        println!("  --config-file        Path to config file (required)");
        println!("  --node-name          Node route identity (overrides config)");
        println!("  --prom-exporter      Prometheus Exporter http address");
        println!("  --advert-group       Proxy advertisement multicast group (overrides config)");
        println!("  --advert-port        Proxy advertisement port (overrides config)");
    }

    pub(crate) fn parse() -> Result<Self> {
        let args: Vec<String> = env::args().collect();

        if args.len() <= 1 {
            Self::show_usage();
            return Err(anyhow::anyhow!("No arguments provided"));
        }

        let mut config_file = None;
        let mut node_name = None;
        let mut prom_exporter = None;
        let mut advert_group = None;
        let mut advert_port = None;

        let mut args_iter = args.iter().skip(1);
        while let Some(arg) = args_iter.next() {
            match arg.as_str() {
                "--config-file" => {
                    config_file = args_iter.next().map(|s| s.to_string());
                }
                "--node-name" => {
                    node_name = args_iter.next().map(|s| s.to_string());
                }
                "--prom-exporter" => {
                    prom_exporter = args_iter.next().map(|s| s.to_string());
                }
                "--advert-group" => {
                    advert_group = args_iter.next().map(|s| s.to_string());
                }
                "--advert-port" => {
                    advert_port = match args_iter.next() {
                        Some(port) => Some(port.parse()?),
                        None => None,
                    };
                }
                other => {
                    Self::show_usage();
                    return Err(anyhow::anyhow!("Unknown argument: {}", other));
                }
            }
        }

        let config_file = match config_file {
            Some(path) => path,
            None => {
                Self::show_usage();
                return Err(anyhow::anyhow!("--config-file is required"));
            }
        };

        Ok(Args {
            config_file,
            node_name,
            prom_exporter,
            advert_group,
            advert_port,
        })
    }
}
