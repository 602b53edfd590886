use std::process::ExitCode;

use capy_rkt::{
    load::expand::RacketExpander,
    options::{Options, USAGE},
    runtime::value::Value,
    Runtime,
};
use termcolor::{ColorChoice, StandardStream};

fn main() -> ExitCode {
    env_logger::init();

    let options = match Options::parse() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("capy-rkt: {}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };
    if options.help {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    let expander = RacketExpander::from_env().with_cache(!options.no_cache);
    let mut runtime = Runtime::new(Box::new(expander));

    let module = match (&options.json, &options.filename) {
        (Some(json), _) => {
            let tree = match std::fs::read_to_string(json)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
            {
                Ok(tree) => tree,
                Err(e) => {
                    eprintln!("capy-rkt: cannot read {}: {}", json.display(), e);
                    return ExitCode::FAILURE;
                }
            };
            runtime.load_json(&tree, &json.to_string_lossy())
        }
        (None, Some(file)) => runtime.load_file(file),
        (None, None) => unreachable!("options require an input"),
    };
    let module = match module {
        Ok(module) => module,
        Err(e) => {
            eprintln!("capy-rkt: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if options.print_ast {
        let mut out = StandardStream::stdout(ColorChoice::Auto);
        for form in module.lang.iter().chain(module.body.iter()) {
            if let Err(e) = form.pretty_print(&mut out) {
                eprintln!("capy-rkt: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    match runtime.run(&module) {
        Ok(Value::Void) => ExitCode::SUCCESS,
        Ok(value) => {
            println!("{}", value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("capy-rkt: {}", e);
            log::debug!("evaluation stats: {:?}", runtime.interpreter().stats());
            ExitCode::FAILURE
        }
    }
}
