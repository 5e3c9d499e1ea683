use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::net::protocol::{self, ClientMessage};
use crate::net::ws;
use crate::telemetry::logging;
use crate::world::quest::Quest;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub ws_allowed_origins: Option<Vec<String>>,
    pub max_payload: usize,
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8765".to_string(),
            ws_allowed_origins: None,
            max_payload: 64 * 1024,
            read_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct ServerControl {
    shutdown: AtomicBool,
}

impl ServerControl {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ServerControl {
    fn default() -> Self {
        Self::new()
    }
}

type SharedStream = Arc<Mutex<TcpStream>>;

/// Live connections keyed by player id. Owned by the server and passed
/// down into sessions; one registration per player, a reconnect replaces
/// the stale entry.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, SharedStream>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, player: &str, stream: SharedStream) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(player.to_string(), stream);
        }
    }

    /// Drop the registration, but only if it still belongs to this
    /// connection; a reconnect may have replaced it already.
    fn unregister(&self, player: &str, stream: &SharedStream) {
        if let Ok(mut entries) = self.entries.lock() {
            let owned = entries
                .get(player)
                .map(|current| Arc::ptr_eq(current, stream))
                .unwrap_or(false);
            if owned {
                entries.remove(player);
            }
        }
    }

    fn peers_of(&self, player: &str) -> Vec<(String, SharedStream)> {
        match self.entries.lock() {
            Ok(entries) => entries
                .iter()
                .filter(|(id, _)| id.as_str() != player)
                .map(|(id, stream)| (id.clone(), Arc::clone(stream)))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn send_text(stream: &SharedStream, text: &str) -> Result<(), String> {
    let mut stream = stream
        .lock()
        .map_err(|_| "stream lock poisoned".to_string())?;
    ws::write_text(&mut stream, text)
}

fn send_control(stream: &SharedStream, opcode: u8, payload: &[u8]) -> Result<(), String> {
    let mut stream = stream
        .lock()
        .map_err(|_| "stream lock poisoned".to_string())?;
    ws::write_frame(&mut stream, opcode, payload)
}

/// Accept loop: one thread per connection, polling the shutdown flag
/// between accepts. Connection failures are logged and never take the
/// server down.
pub fn run_server(
    config: ServerConfig,
    quest: Arc<Mutex<Quest>>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let listener = TcpListener::bind(&config.bind_addr)
        .map_err(|err| format!("bind {} failed: {}", config.bind_addr, err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("listener nonblocking failed: {}", err))?;

    logging::log_game(&format!("server listening on {}", config.bind_addr));
    println!("quest: server listening on {}", config.bind_addr);

    let registry = Arc::new(SessionRegistry::new());

    while control.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => {
                println!("quest: connection from {}", addr);
                logging::log_netload(&format!("connection from {}", addr));
                let config = config.clone();
                let registry = Arc::clone(&registry);
                let quest = Arc::clone(&quest);
                let control = Arc::clone(&control);
                thread::spawn(move || {
                    if let Err(err) =
                        handle_connection(stream, &config, &registry, &quest, &control)
                    {
                        logging::log_error(&format!("connection error: {}", err));
                        eprintln!("connection error: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                logging::log_error(&format!("accept error: {}", err));
                eprintln!("accept error: {}", err);
            }
        }
    }

    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    config: &ServerConfig,
    registry: &SessionRegistry,
    quest: &Arc<Mutex<Quest>>,
    control: &Arc<ServerControl>,
) -> Result<(), String> {
    stream
        .set_read_timeout(Some(config.read_timeout))
        .map_err(|err| format!("read timeout set failed: {}", err))?;

    let ws_config = ws::WsHandshakeConfig {
        allowed_origins: config.ws_allowed_origins.clone(),
        ..ws::WsHandshakeConfig::default()
    };
    ws::accept_handshake(&mut stream, &ws_config)?;

    let writer: SharedStream = Arc::new(Mutex::new(
        stream
            .try_clone()
            .map_err(|err| format!("stream clone failed: {}", err))?,
    ));

    let mut session_player: Option<String> = None;
    let result = session_loop(
        &mut stream,
        config,
        registry,
        quest,
        control,
        &writer,
        &mut session_player,
    );

    if let Some(player) = session_player {
        registry.unregister(&player, &writer);
        logging::log_netload(&format!("player {} disconnected", player));
    }
    result
}

fn session_loop(
    reader: &mut TcpStream,
    config: &ServerConfig,
    registry: &SessionRegistry,
    quest: &Arc<Mutex<Quest>>,
    control: &Arc<ServerControl>,
    writer: &SharedStream,
    session_player: &mut Option<String>,
) -> Result<(), String> {
    loop {
        if !control.is_running() {
            let _ = send_control(writer, ws::OPCODE_CLOSE, &[]);
            return Ok(());
        }
        match ws::read_frame(reader, config.max_payload) {
            Ok(frame) => match frame.opcode {
                ws::OPCODE_TEXT => {
                    let payload = String::from_utf8_lossy(&frame.payload).to_string();
                    let reply = handle_message(&payload, session_player, registry, quest, writer);
                    send_text(writer, &reply)?;
                }
                ws::OPCODE_PING => {
                    send_control(writer, ws::OPCODE_PONG, &frame.payload)?;
                }
                ws::OPCODE_CLOSE => {
                    let _ = send_control(writer, ws::OPCODE_CLOSE, &[]);
                    return Ok(());
                }
                _ => {}
            },
            Err(ws::WsFrameError::Timeout) => {
                send_control(writer, ws::OPCODE_PING, &[])?;
            }
            Err(ws::WsFrameError::Closed) => return Ok(()),
            Err(err) => return Err(format!("read frame failed: {}", err)),
        }
    }
}

/// Decode one inbound frame, run it against the quest and build the reply.
/// The quest mutex is held across the whole `perform_action` call plus
/// response assembly, so concurrent sessions never interleave inside one
/// action.
fn handle_message(
    payload: &str,
    session_player: &mut Option<String>,
    registry: &SessionRegistry,
    quest: &Arc<Mutex<Quest>>,
    writer: &SharedStream,
) -> String {
    let message = match protocol::parse_client_message(payload) {
        Ok(message) => message,
        Err(err) => return protocol::plain_error(&err),
    };

    match message {
        ClientMessage::Connect { connect } => {
            let ambient = {
                let quest = match quest.lock() {
                    Ok(quest) => quest,
                    Err(_) => return protocol::plain_error("quest state unavailable"),
                };
                if !quest.is_player(&connect) {
                    logging::log_game(&format!("rejected connect for '{}'", connect));
                    return protocol::plain_error("Player not found");
                }
                protocol::ambient_for(&quest, &connect)
            };
            registry.register(&connect, Arc::clone(writer));
            logging::log_game(&format!("player {} connected", connect));
            *session_player = Some(connect.clone());
            protocol::welcome_frame(&connect, ambient.as_ref())
        }
        ClientMessage::Action {
            player,
            action_type,
            target_1,
            target_2,
        } => {
            let (reply, refreshes) = {
                let mut quest = match quest.lock() {
                    Ok(quest) => quest,
                    Err(_) => return protocol::plain_error("quest state unavailable"),
                };
                match quest.perform_action(&player, &action_type, &target_1, &target_2) {
                    Ok(outcome) => {
                        logging::log_game(&format!(
                            "{} {} '{}' '{}' -> success={}",
                            player, action_type, target_1, target_2, outcome.success
                        ));
                        let reply = protocol::result_frame(
                            &outcome,
                            protocol::ambient_for(&quest, &player).as_ref(),
                        );
                        // Everyone else sees the world the action may have
                        // changed; frames are built under the lock, written
                        // after it is released.
                        let refreshes: Vec<(SharedStream, String)> = registry
                            .peers_of(&player)
                            .into_iter()
                            .filter_map(|(peer, stream)| {
                                protocol::ambient_for(&quest, &peer)
                                    .map(|ambient| (stream, protocol::refresh_frame(&ambient)))
                            })
                            .collect();
                        (reply, refreshes)
                    }
                    Err(err) => {
                        // Invariant violations mean a broken action table
                        // or engine bug, not player error.
                        if matches!(err, crate::world::quest::ActionError::InvariantViolation(_)) {
                            logging::log_error(&format!(
                                "{} {} '{}' '{}' -> {}",
                                player, action_type, target_1, target_2, err
                            ));
                        } else {
                            logging::log_game(&format!(
                                "{} {} '{}' '{}' -> error: {}",
                                player, action_type, target_1, target_2, err
                            ));
                        }
                        (protocol::error_frame(&err), Vec::new())
                    }
                }
            };
            for (stream, frame) in refreshes {
                if let Err(err) = send_text(&stream, &frame) {
                    logging::log_error(&format!("refresh push failed: {}", err));
                }
            }
            reply
        }
    }
}
