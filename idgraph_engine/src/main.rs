/// idgraph: describe a JSON-encoded value the way the engine sees it.
///
/// Usage: idgraph [VALUE_JSON_PATH | -] [CONFIG_JSON_PATH]
///
/// Reads the value (stdin when the path is `-` or missing), converts it
/// with `value::from_json`, then prints the canonical graph text and the
/// structural digests with and without identity. Logging goes to stderr
/// and is controlled by `RUST_LOG`.

use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use tracing::info;
use tracing_subscriber::EnvFilter;

use idgraph_engine::hashing::graph_digest;
use idgraph_engine::value::from_json;
use idgraph_engine::{EngineConfig, IdGraphEngine};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("idgraph: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let input = match args.first().map(String::as_str) {
        None | Some("-") => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
        Some(path) => fs::read_to_string(path)?,
    };

    let config = match args.get(1) {
        Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    info!(?config, "engine configured");

    let json: serde_json::Value = serde_json::from_str(&input)?;
    let value = from_json(&json);

    let engine = IdGraphEngine::new(config);
    let handle = engine.build_graph(&value)?;
    let graph = engine.graph(handle)?;

    println!("{}", engine.to_text_pretty(handle)?);
    println!("nodes:            {}", graph.node_count());
    println!("graph digest:     {}", graph_digest(&graph));
    println!("value digest:     {}", engine.hash(&value, false)?);
    println!("identity digest:  {}", engine.hash(&value, true)?);

    drop(graph);
    engine.release(handle)?;
    Ok(())
}
