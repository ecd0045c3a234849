use clap::{ArgAction, Parser};
use screen_worms::broadcast::pack_events;
use screen_worms::logger::Logger;
use screen_worms::player::{AdmitOutcome, ControlPacket, Registry, MAX_CONTROL_PACKET};
use screen_worms::rng::Rng;
use screen_worms::simulation::GameState;
use screen_worms::worm::TurnDirection;
use std::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// ── CLI ───────────────────────────────────────────────────────────────────────

const MAX_DIMENSION: u32 = 2000;

/// Short enough that the main loop never stalls on `recv_from` for long,
/// matching `RCV_WAIT` in `screen-worms-server.cpp`.
const RECV_TIMEOUT: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(
    name = "server",
    version,
    about = "Screen worms — dedicated UDP game server",
    long_about = "Runs one worm game at a time: accepts control packets from \
                  clients, simulates worm movement on a discrete board, and \
                  broadcasts a binary event log. See the README for the wire \
                  protocol."
)]
struct Args {
    /// UDP port to listen on
    #[arg(short = 'p', long, default_value_t = 2021)]
    port: u16,

    /// RNG seed (defaults to the current wall-clock time in seconds)
    #[arg(short = 's', long)]
    seed: Option<u32>,

    /// Degrees a worm turns per tick when turning
    #[arg(short = 't', long, default_value_t = 6)]
    turning_speed: u32,

    /// Simulation ticks per second
    #[arg(short = 'v', long, default_value_t = 50)]
    rounds_per_sec: u32,

    /// Board width in cells (capped at 2000)
    #[arg(short = 'w', long, default_value_t = 640)]
    width: u32,

    /// Board height in cells (capped at 2000)
    #[arg(short = 'h', long, default_value_t = 480)]
    height: u32,

    /// Increase output verbosity (-x verbose, -xx debug, -xxx trace)
    #[arg(short = 'x', long, action = ArgAction::Count)]
    verbose: u8,
}

// ── DISPLAY EVENTS ────────────────────────────────────────────────────────────

enum Event {
    Listening { addr: String, seed: u32 },
    PlayerAdmitted { addr: SocketAddr },
    PlayerEvicted { addr: SocketAddr },
    DatagramDropped { addr: SocketAddr },
    GameStarted { game_id: u32, worms: usize },
    GameOver { game_id: u32 },
    TickRan { game_id: u32, log_len: usize },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Listening { addr, seed } => write!(f, "Listening on {addr} (seed {seed})"),
            Event::PlayerAdmitted { addr } => write!(f, "Player admitted from {addr}"),
            Event::PlayerEvicted { addr } => write!(f, "Player {addr} timed out"),
            Event::DatagramDropped { addr } => write!(f, "Dropped datagram from {addr}"),
            Event::GameStarted { game_id, worms } => write!(f, "[game {game_id}] started with {worms} worms"),
            Event::GameOver { game_id } => write!(f, "[game {game_id}] over, returning to lobby"),
            Event::TickRan { game_id, log_len } => write!(f, "[game {game_id}] tick ran, log now {log_len} event(s)"),
        }
    }
}

// ── SERVER STATE ──────────────────────────────────────────────────────────────

struct Config {
    turning_speed: u32,
    tick_period: Duration,
    width: u32,
    height: u32,
}

struct GameServer {
    socket: UdpSocket,
    config: Config,
    rng: Rng,
    registry: Registry,
    game: Option<GameState>,
    last_broadcast_event_no: usize,
    next_tick_deadline: Instant,
    log: Logger,
}

impl GameServer {
    fn send_replay(&self, addr: SocketAddr, from: usize) {
        let Some(game) = &self.game else { return };
        let events: Vec<Vec<u8>> = game.log.slice_from(from).to_vec();
        for datagram in pack_events(game.game_id, &events) {
            let _ = self.socket.send_to(&datagram, addr);
        }
    }

    fn broadcast_new_events(&mut self) {
        let Some(game) = &self.game else { return };
        let from = self.last_broadcast_event_no;
        if from >= game.log.len() {
            return;
        }
        let events: Vec<Vec<u8>> = game.log.slice_from(from).to_vec();
        let datagrams = pack_events(game.game_id, &events);
        let addrs: Vec<SocketAddr> = self.registry.iter().map(|(a, _)| *a).collect();
        for addr in addrs {
            for datagram in &datagrams {
                let _ = self.socket.send_to(datagram, addr);
            }
        }
        self.last_broadcast_event_no = game.log.len();
    }

    /// Drains up to `max` pending datagrams from the UDP socket, admitting
    /// or refreshing players and replying with any requested replay.
    /// Converted from: `read_from_client` in `screen-worms-server.cpp`.
    fn drain_datagrams(&mut self, max: usize) {
        let mut buf = [0u8; MAX_CONTROL_PACKET];
        for _ in 0..max {
            let (len, addr) = match self.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(_) => return,
            };

            let pkt = match ControlPacket::parse(&buf[..len]) {
                Some(p) => p,
                None => {
                    self.log.verbose(Event::DatagramDropped { addr });
                    continue;
                }
            };
            let next_expected = pkt.next_expected_event_no as usize;
            let now = Instant::now();

            match self.registry.admit(addr, pkt, now) {
                AdmitOutcome::Accepted => {
                    self.log.trace(Event::PlayerAdmitted { addr });
                    if let Some(game) = &mut self.game {
                        self.registry.set_worm_turn_direction(&addr, &mut game.worms);
                    }
                    self.send_replay(addr, next_expected);
                }
                AdmitOutcome::Dropped => {
                    self.log.verbose(Event::DatagramDropped { addr });
                }
            }
        }
    }

    fn evict_timed_out(&mut self) {
        let now = Instant::now();
        let timed_out: Vec<SocketAddr> = self
            .registry
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(a, _)| *a)
            .collect();
        for addr in timed_out {
            self.log.info(Event::PlayerEvicted { addr });
        }
        self.registry.evict_timed_out(now);
    }

    /// Waits in the lobby until at least two named, ready players are
    /// present and no named player is unready, then starts a game.
    /// Converted from: `start_game` in `screen-worms-server.cpp`.
    fn await_game_start(&mut self) {
        loop {
            self.evict_timed_out();
            if self.registry.check_start() {
                break;
            }
            self.drain_datagrams(10);
        }

        let order = self.registry.ready_players_sorted();
        let players: Vec<(String, TurnDirection)> = order
            .iter()
            .map(|addr| {
                let p = self.registry.get(addr).unwrap();
                (p.name.clone(), p.turn_direction)
            })
            .collect();

        let game = GameState::start(&mut self.rng, self.config.width, self.config.height, &players);
        for (i, addr) in order.iter().enumerate() {
            self.registry.set_worm_num(addr, i as i32);
        }

        self.log.info(Event::GameStarted { game_id: game.game_id, worms: game.worms.len() });
        self.last_broadcast_event_no = 0;
        self.game = Some(game);
        self.next_tick_deadline = Instant::now() + self.config.tick_period;

        // Flush whatever start() queued, possibly ending the game already,
        // before the first tick runs.
        self.broadcast_new_events();
        if self.game.as_ref().map(|g| g.worms_alive) == Some(1) {
            self.end_game();
        }
    }

    /// Runs ticks and services the network until the game ends.
    /// Converted from: `make_turns` in `screen-worms-server.cpp`.
    fn run_game(&mut self) {
        while self.game.is_some() {
            let now = Instant::now();
            while self.game.is_some() && self.next_tick_deadline <= now {
                self.next_tick_deadline += self.config.tick_period;
                let outcome = self.game.as_mut().unwrap().tick(self.config.turning_speed);
                let game = self.game.as_ref().unwrap();
                self.log.trace(Event::TickRan { game_id: game.game_id, log_len: game.log.len() });
                self.broadcast_new_events();
                if outcome.game_over {
                    self.end_game();
                    return;
                }
            }

            self.evict_timed_out();
            self.drain_datagrams(10);
        }
    }

    fn end_game(&mut self) {
        if let Some(game) = &self.game {
            self.log.info(Event::GameOver { game_id: game.game_id });
        }
        self.registry.reset_for_lobby();
        self.game = None;
    }

    fn play(&mut self) -> ! {
        loop {
            self.await_game_start();
            self.run_game();
        }
    }
}

// ── ENTRY POINT ───────────────────────────────────────────────────────────────

fn default_seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn main() {
    let args = Args::parse();
    let log = Logger::new(args.verbose);

    if args.width == 0 || args.width > MAX_DIMENSION {
        eprintln!("width must be between 1 and {MAX_DIMENSION}");
        std::process::exit(1);
    }
    if args.height == 0 || args.height > MAX_DIMENSION {
        eprintln!("height must be between 1 and {MAX_DIMENSION}");
        std::process::exit(1);
    }
    if args.rounds_per_sec == 0 {
        eprintln!("rounds_per_sec must be at least 1");
        std::process::exit(1);
    }

    let seed = args.seed.unwrap_or_else(default_seed);

    let socket = UdpSocket::bind(("::", args.port)).unwrap_or_else(|e| {
        eprintln!("failed to bind UDP socket on port {}: {e}", args.port);
        std::process::exit(1);
    });
    socket
        .set_read_timeout(Some(RECV_TIMEOUT))
        .unwrap_or_else(|e| {
            eprintln!("failed to configure socket timeout: {e}");
            std::process::exit(1);
        });

    log.info(Event::Listening { addr: format!("[::]:{}", args.port), seed });

    let mut server = GameServer {
        socket,
        config: Config {
            turning_speed: args.turning_speed,
            tick_period: Duration::from_secs_f64(1.0 / args.rounds_per_sec as f64),
            width: args.width,
            height: args.height,
        },
        rng: Rng::new(seed),
        registry: Registry::new(),
        game: None,
        last_broadcast_event_no: 0,
        next_tick_deadline: Instant::now(),
        log,
    };

    server.play();
}
