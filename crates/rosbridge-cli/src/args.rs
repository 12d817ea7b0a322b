//! Command-line arguments.
//!
//!   topic:type                      – subscribe (`Bool`, `Float64`, `String`)
//!   --call SERVICE:TYPE ARGS        – call a service once connected
//!   -h | --help                     – show usage

use crate::bindings::Subscription;

pub const USAGE: &str = "\
Usage: rosbridge [topic:type ...] [--call SERVICE:TYPE ARGS]

  topic:type              subscribe to topic; type is Bool, Float64 or String
                          (optionally prefixed with std_msgs/)
  --call SERVICE:TYPE ARGS
                          call SERVICE once connected; ARGS is JSON ('' for none)
  -h, --help              show this help

Server address comes from ~/.rosbridge/client.toml or ROSBRIDGE_HOST,
ROSBRIDGE_PORT and ROSBRIDGE_TLS.  ROSBRIDGE_LOG_FORMAT=json switches logs
to JSON.";

/// A one-shot service call requested with `--call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    pub service: String,
    pub service_type: String,
    pub args: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub subscriptions: Vec<Subscription>,
    pub call: Option<ServiceCall>,
    pub help: bool,
}

impl CliArgs {
    pub fn parse<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => parsed.help = true,
                "--call" => {
                    let target = args
                        .next()
                        .ok_or_else(|| "--call needs SERVICE:TYPE".to_string())?;
                    let call_args = args
                        .next()
                        .ok_or_else(|| "--call needs ARGS (use '' for none)".to_string())?;
                    let (service, service_type) = target
                        .split_once(':')
                        .ok_or_else(|| format!("expected SERVICE:TYPE, got '{target}'"))?;
                    parsed.call = Some(ServiceCall {
                        service: service.to_string(),
                        service_type: service_type.to_string(),
                        args: call_args,
                    });
                }
                other if other.starts_with('-') => {
                    return Err(format!("unknown option '{other}'"));
                }
                other => parsed.subscriptions.push(other.parse()?),
            }
        }

        Ok(parsed)
    }
}
