mod config;
pub mod net;
pub mod scripting;
pub mod telemetry;
pub mod world;

pub use net::protocol::{ambient_for, Ambient, ClientMessage};
pub use net::server::{run_server, ServerConfig, ServerControl};
pub use scripting::action::{ActionNode, ActionOutcome, EffectNode};
pub use scripting::expr::{eval, Context, EvalError, Expr};
pub use scripting::script::{load_script, parse_script_json, parse_script_yaml};
pub use scripting::value::AttrValue;
pub use world::object::GameObject;
pub use world::quest::{ActionError, ActionType, Quest};

pub fn run(args: &[String]) -> Result<(), String> {
    let config = config::AppConfig::from_args(args)?;
    telemetry::logging::init(&config.root())?;

    // A script that fails to load or validate never serves a session.
    let quest = scripting::script::load_script(&config.script_path)?;

    telemetry::logging::log_game(&format!(
        "script loaded: title='{}', objects={}, players={}",
        quest.title,
        quest.objects.len(),
        quest.players.len()
    ));
    println!("quest: script loaded");
    println!("- script: {}", config.script_path.display());
    println!("- title: {}", quest.title);
    println!("- objects: {}", quest.objects.len());
    println!("- players: {}", quest.players.join(", "));
    if !quest.end_actions.is_empty() {
        println!("- end actions: {}", quest.end_actions.len());
    }

    let server_config = net::server::ServerConfig {
        bind_addr: config.bind_addr.clone(),
        ws_allowed_origins: config.ws_allowed_origins.clone(),
        ..net::server::ServerConfig::default()
    };
    let quest = std::sync::Arc::new(std::sync::Mutex::new(quest));
    let control = std::sync::Arc::new(net::server::ServerControl::new());
    net::server::run_server(server_config, quest, control)
}
