use std::{ffi::OsString, path::PathBuf};

pub const USAGE: &str = "\
Usage: capy-rkt [options] <source file>
Options:
  -h, --help: Print this help message
  --json <file>: Run an already expanded module instead of a source file
  --print-ast: Print the converted module before running it
  --no-cache: Never read or write the .json expansion next to a source file";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub help: bool,
    pub json: Option<PathBuf>,
    pub print_ast: bool,
    pub no_cache: bool,
    pub filename: Option<PathBuf>,
}

impl Options {
    pub fn parse() -> Result<Self, String> {
        parse(pico_args::Arguments::from_env())
    }

    pub fn parse_from(args: Vec<OsString>) -> Result<Self, String> {
        parse(pico_args::Arguments::from_vec(args))
    }
}

fn parse(mut args: pico_args::Arguments) -> Result<Options, String> {
    let mut options = Options::default();
    if args.contains(["-h", "--help"]) {
        options.help = true;
        return Ok(options);
    }

    options.json = args
        .opt_value_from_str::<_, PathBuf>("--json")
        .map_err(|e| e.to_string())?;
    options.print_ast = args.contains("--print-ast");
    options.no_cache = args.contains("--no-cache");
    options.filename = args
        .opt_free_from_str::<PathBuf>()
        .map_err(|e| e.to_string())?;

    let rest = args.finish();
    if !rest.is_empty() {
        return Err(format!("unexpected arguments: {:?}", rest));
    }
    if options.json.is_none() && options.filename.is_none() {
        return Err("no input file".to_owned());
    }
    Ok(options)
}
