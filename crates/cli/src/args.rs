use std::path::PathBuf;

pub const USAGE: &str = "\
usage: sw-gateway serve [options]

options:
  --port <port>        port to listen on
  --origin <origin>    origin the worker is registered on
  --config <path>      JSON gateway config seeded into the config store
  --static <dir>       directory served for requests the worker ignores
  --help               show this help";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServeArgs {
    pub port: Option<u16>,
    pub origin: Option<String>,
    pub config: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve(ServeArgs),
    Help,
}

pub fn parse(args: &[String]) -> Result<Command, String> {
    let mut serve = ServeArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "serve" | "start" => {}
            "--help" | "-H" | "help" => return Ok(Command::Help),
            "--port" => {
                let value = value_for(arg, iter.next())?;
                let port = value
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port {:?}", value))?;
                serve.port = Some(port);
            }
            "--origin" => serve.origin = Some(value_for(arg, iter.next())?.to_string()),
            "--config" => serve.config = Some(PathBuf::from(value_for(arg, iter.next())?)),
            "--static" => serve.static_dir = Some(PathBuf::from(value_for(arg, iter.next())?)),
            other => return Err(format!("unknown argument {:?}", other)),
        }
    }
    Ok(Command::Serve(serve))
}

fn value_for<'a>(param: &str, value: Option<&'a String>) -> Result<&'a str, String> {
    match value {
        Some(value) if !value.starts_with("--") => Ok(value.as_str()),
        _ => Err(format!("missing value for {}", param)),
    }
}
