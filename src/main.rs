mod adapters;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use sentinelfs_core::catalog::{Catalog, RedbCatalog};
use sentinelfs_core::config::Config;
use sentinelfs_core::conflict::strategy::ConflictStrategy;
use sentinelfs_core::crypto::kdf::{argon2id_derive, Argon2Params};
use sentinelfs_core::discovery::Discovery;
use sentinelfs_core::exclusion::IgnoreFileMatcher;
use sentinelfs_core::keys::{FileKeyStore, IKeyStore, KeyManager};
use sentinelfs_core::logging::init_tracing;
use sentinelfs_core::mesh::MeshOptimizer;
use sentinelfs_core::orchestrator::bandwidth::BandwidthLimiter;
use sentinelfs_core::orchestrator::checkpoint::CheckpointStore;
use sentinelfs_core::orchestrator::locker::PathLocker;
use sentinelfs_core::orchestrator::selective_sync::{Priority, Rule, SelectiveSyncPolicy};
use sentinelfs_core::orchestrator::versioning::VersionStore;
use sentinelfs_core::orchestrator::{AppContext, DeltaMessage, SyncOrchestrator, MaintenanceState};
use sentinelfs_core::ports::{AllowAll, FsEventKind, Watcher};
use sentinelfs_core::transport::{perform_handshake, ConnectionPool, HandshakeRole, RecordReader};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

use adapters::{PollingWatcher, TcpPeerSender};

fn cli() -> Command {
	Command::new("sentinelfs")
		.version("0.1.0")
		.about("Peer-to-peer filesystem synchronizer")
		.arg(
			Arg::new("session")
				.long("session")
				.value_name("CODE")
				.help("Shared session code identifying this mesh (env SENTINELFS_SESSION_CODE)"),
		)
		.arg(
			Arg::new("path")
				.long("path")
				.value_name("DIR")
				.help("Directory to keep synchronized (env SENTINELFS_SYNC_ROOT)"),
		)
		.arg(
			Arg::new("port")
				.long("port")
				.value_name("N")
				.help("TCP port the secure transport listens on (env SENTINELFS_PORT)"),
		)
		.arg(Arg::new("verbose").long("verbose").action(ArgAction::SetTrue).help("Raise log verbosity"))
		.arg(Arg::new("daemon").long("daemon").action(ArgAction::SetTrue).help("Run without interactive output"))
		.arg(Arg::new("config").long("config").value_name("FILE").help("TOML config file overriding defaults"))
}

fn load_config(matches: &clap::ArgMatches) -> Result<Config, Box<dyn std::error::Error>> {
	let mut config = match matches.get_one::<String>("config") {
		Some(path) => {
			let text = std::fs::read_to_string(path)?;
			toml::from_str::<Config>(&text)?
		}
		None => Config::default(),
	};
	config.apply_env_overrides();

	if let Some(session) = matches.get_one::<String>("session") {
		config.session_code = session.clone();
	}
	if let Some(path) = matches.get_one::<String>("path") {
		config.sync_root = PathBuf::from(path);
	}
	if let Some(port) = matches.get_one::<String>("port") {
		config.tcp_port = port.parse()?;
	}
	if config.node_id.is_empty() {
		config.node_id = uuid::Uuid::new_v4().to_string();
	}
	if config.session_code.is_empty() {
		return Err("session code required: pass --session, set SENTINELFS_SESSION_CODE, or put session_code in --config".into());
	}
	if config.sync_root == PathBuf::from(".") && matches.get_one::<String>("path").is_none() {
		return Err("sync path required: pass --path, set SENTINELFS_SYNC_ROOT, or put sync_root in --config".into());
	}
	Ok(config)
}

async fn load_or_create_salt(state_dir: &std::path::Path) -> std::io::Result<[u8; 16]> {
	let keys_dir = state_dir.join("keys");
	tokio::fs::create_dir_all(&keys_dir).await?;
	let salt_path = keys_dir.join(".salt");
	match tokio::fs::read(&salt_path).await {
		Ok(bytes) if bytes.len() == 16 => {
			let mut salt = [0u8; 16];
			salt.copy_from_slice(&bytes);
			Ok(salt)
		}
		_ => {
			use rand::RngCore;
			let mut salt = [0u8; 16];
			rand::rngs::OsRng.fill_bytes(&mut salt);
			tokio::fs::write(&salt_path, salt).await?;
			Ok(salt)
		}
	}
}

/// Accept inbound peer connections, authenticate each with the HELLO
/// handshake, then loop forwarding signed deltas into the orchestrator
/// until the peer disconnects or shutdown is signalled.
async fn run_listener(
	port: u16,
	keys: Arc<KeyManager>,
	local_peer_id: String,
	orchestrator: Arc<SyncOrchestrator>,
	mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
	let listener = TcpListener::bind(("0.0.0.0", port)).await?;
	loop {
		tokio::select! {
			accepted = listener.accept() => {
				let (mut stream, peer_addr) = accepted?;
				let keys = Arc::clone(&keys);
				let local_peer_id = local_peer_id.clone();
				let orchestrator = Arc::clone(&orchestrator);
				tokio::spawn(async move {
					let signing_key = keys.signing_key();
					let secrets = match perform_handshake(&mut stream, HandshakeRole::Responder, &local_peer_id, &signing_key).await {
						Ok(secrets) => secrets,
						Err(e) => {
							warn!(peer = %peer_addr, error = %e, "inbound handshake failed");
							return;
						}
					};
					keys.add_peer_key(&secrets.remote_peer_id, secrets.remote_identity_pub, true).await;

					let mut reader = RecordReader::new_gcm(stream, secrets.session_key);
					loop {
						let payload = match reader.read_record().await {
							Ok(payload) => payload,
							Err(e) => {
								debug_disconnect(&secrets.remote_peer_id, &e);
								return;
							}
						};
						let message: DeltaMessage = match bincode::deserialize(&payload) {
							Ok(message) => message,
							Err(e) => {
								warn!(peer = %secrets.remote_peer_id, error = %e, "malformed delta payload");
								continue;
							}
						};
						if let Err(e) = orchestrator.handle_inbound_delta(&secrets.remote_peer_id, message).await {
							warn!(peer = %secrets.remote_peer_id, error = %e, "rejected inbound delta");
						}
					}
				});
			}
			_ = shutdown.changed() => {
				info!("transport listener shutting down");
				return Ok(());
			}
		}
	}
}

fn debug_disconnect(peer_id: &str, err: &sentinelfs_core::error::TransportError) {
	tracing::debug!(peer = peer_id, error = %err, "peer connection closed");
}

async fn run(matches: clap::ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
	let config = load_config(&matches)?;
	if matches.get_flag("verbose") {
		std::env::set_var("RUST_LOG", "debug");
	}
	init_tracing();

	tokio::fs::create_dir_all(&config.sync_root).await?;
	tokio::fs::create_dir_all(&config.state_dir).await?;

	let salt = load_or_create_salt(&config.state_dir).await?;
	let master_key = argon2id_derive(config.session_code.as_bytes(), &salt, Argon2Params::default())?;

	let key_store: Arc<dyn IKeyStore> = Arc::new(FileKeyStore::new(config.state_dir.join("keys"), master_key));
	let keys = Arc::new(KeyManager::open_or_create(key_store, &config.node_id).await?);

	let catalog: Arc<dyn Catalog> = Arc::new(RedbCatalog::open(&config.state_dir.join("catalog.db"))?);
	let checkpoints = Arc::new(
		CheckpointStore::open(
			config.state_dir.join("checkpoints"),
			config.checkpoint_max_retries,
			config.checkpoint_max_age_secs,
		)
		.await?,
	);
	let versions = Arc::new(
		VersionStore::open(
			config.state_dir.join("versions"),
			config.max_versions_per_path,
			config.max_version_age_secs,
			&config.important_version_patterns,
			config.version_compress_after_secs,
		)
		.await?,
	);
	let locker = Arc::new(PathLocker::new());
	let bandwidth = Arc::new(BandwidthLimiter::new(
		config.max_upload_bytes_per_s,
		config.max_download_bytes_per_s,
		config.bandwidth_burst_allowance,
		config.bandwidth_adaptive,
		config.bandwidth_allowed_hours.clone(),
	));
	let rules: Result<Vec<Rule>, _> = config
		.exclude_patterns
		.iter()
		.map(|pattern| Rule::new(pattern, Priority::Normal, false, None, None, Vec::new()))
		.collect();
	let selective_sync = Arc::new(SelectiveSyncPolicy::new(rules?));
	let mesh = Arc::new(Mutex::new(MeshOptimizer::new()));
	let access_policy = Arc::new(AllowAll);

	let pool = Arc::new(ConnectionPool::new());
	let peer_addrs: Arc<RwLock<HashMap<String, SocketAddr>>> = Arc::new(RwLock::new(HashMap::new()));
	let peer_sender = Arc::new(TcpPeerSender::new(
		Arc::clone(&pool),
		Arc::clone(&keys),
		config.node_id.clone(),
		Arc::clone(&peer_addrs),
	));

	let local_peer_id = config.node_id.clone();
	let ctx = Arc::new(AppContext::new(
		catalog,
		Arc::clone(&keys),
		checkpoints,
		versions,
		locker,
		bandwidth,
		selective_sync,
		Arc::clone(&mesh),
		access_policy,
		peer_sender,
		config.clone(),
		local_peer_id.clone(),
	));
	let orchestrator = Arc::new(SyncOrchestrator::new(Arc::clone(&ctx), ConflictStrategy::Timestamp));

	let (shutdown_tx, shutdown_rx) = watch::channel(false);

	let discovery = Arc::new(
		Discovery::bind(config.session_code.clone(), config.node_id.clone(), config.tcp_port).await?,
	);

	let listener_task = {
		let keys = Arc::clone(&keys);
		let orchestrator = Arc::clone(&orchestrator);
		let local_peer_id = local_peer_id.clone();
		let shutdown_rx = shutdown_rx.clone();
		let tcp_port = config.tcp_port;
		tokio::spawn(async move {
			if let Err(e) = run_listener(tcp_port, keys, local_peer_id, orchestrator, shutdown_rx).await {
				error!(error = %e, "transport listener failed");
			}
		})
	};

	let discovery_broadcast_task = {
		let discovery = Arc::clone(&discovery);
		let mut shutdown_rx = shutdown_rx.clone();
		tokio::spawn(async move {
			loop {
				if let Err(e) = discovery.broadcast_presence().await {
					warn!(error = %e, "discovery broadcast failed");
				}
				tokio::select! {
					_ = tokio::time::sleep(Duration::from_secs(10)) => {}
					_ = shutdown_rx.changed() => return,
				}
			}
		})
	};

	let discovery_listen_task = {
		let discovery = Arc::clone(&discovery);
		let shutdown_rx = shutdown_rx.clone();
		tokio::spawn(async move { discovery.run_listener(shutdown_rx).await })
	};

	let peer_registry_task = {
		let discovery = Arc::clone(&discovery);
		let mesh = Arc::clone(&mesh);
		let peer_addrs = Arc::clone(&peer_addrs);
		let mut shutdown_rx = shutdown_rx.clone();
		tokio::spawn(async move {
			loop {
				for peer in discovery.peers() {
					{
						let mut mesh = mesh.lock().await;
						mesh.add_peer(&peer.node_id);
					}
					peer_addrs
						.write()
						.await
						.insert(peer.node_id.clone(), SocketAddr::new(peer.address, peer.tcp_port));
				}
				tokio::select! {
					_ = tokio::time::sleep(Duration::from_secs(5)) => {}
					_ = shutdown_rx.changed() => return,
				}
			}
		})
	};

	let maintenance_task = {
		let orchestrator = Arc::clone(&orchestrator);
		let mut shutdown_rx = shutdown_rx.clone();
		tokio::spawn(async move {
			let mut state = MaintenanceState::default();
			loop {
				let now = std::time::SystemTime::now()
					.duration_since(std::time::UNIX_EPOCH)
					.map(|d| d.as_secs())
					.unwrap_or(0);
				orchestrator.run_maintenance_tick(&mut state, now).await;
				tokio::select! {
					_ = tokio::time::sleep(Duration::from_secs(5)) => {}
					_ = shutdown_rx.changed() => return,
				}
			}
		})
	};

	let respect_files: Vec<String> = if config.respect_ignore_files {
		vec!["gitignore".to_string(), "syncignore".to_string()]
	} else {
		Vec::new()
	};
	let ignore = IgnoreFileMatcher::new(&config.sync_root, &respect_files)?;
	let mut watcher = PollingWatcher::new(config.sync_root.clone(), Duration::from_millis(500), ignore);

	let watcher_task = {
		let orchestrator = Arc::clone(&orchestrator);
		let sync_root = config.sync_root.clone();
		let mut shutdown_rx = shutdown_rx.clone();
		tokio::spawn(async move {
			loop {
				let event = tokio::select! {
					event = watcher.next_event() => event,
					_ = shutdown_rx.changed() => return,
				};
				let event = match event {
					Ok(Some(event)) => event,
					Ok(None) => return,
					Err(e) => {
						warn!(error = %e, "watcher error");
						continue;
					}
				};
				let Ok(relative) = event.path.strip_prefix(&sync_root) else { continue };
				let Some(relative_str) = relative.to_str() else { continue };
				let Ok(path) = sentinelfs_core::catalog::FilePath::try_from(relative_str) else { continue };

				match event.kind {
					FsEventKind::Deleted => {
						if let Err(e) = orchestrator.handle_local_delete(path).await {
							warn!(error = %e, "local delete handling failed");
						}
					}
					FsEventKind::Created | FsEventKind::Modified => {
						let Ok(bytes) = tokio::fs::read(&event.path).await else { continue };
						let mtime = tokio::fs::metadata(&event.path)
							.await
							.ok()
							.and_then(|m| m.modified().ok())
							.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
							.map(|d| d.as_secs())
							.unwrap_or(0);
						if let Err(e) = orchestrator.handle_local_change(path, &bytes, mtime).await {
							warn!(error = %e, "local change handling failed");
						}
					}
				}
			}
		})
	};

	info!(node_id = %local_peer_id, port = config.tcp_port, "sentinelfs running");

	let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
	let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
	tokio::select! {
		_ = sigterm.recv() => info!("received SIGTERM"),
		_ = sigint.recv() => info!("received SIGINT"),
	}

	// Shutdown ordering: watchers, then orchestrator-adjacent tasks, then
	// transport, then maintenance.
	let _ = shutdown_tx.send(true);
	let _ = watcher_task.await;
	let _ = peer_registry_task.await;
	let _ = discovery_broadcast_task.await;
	let _ = discovery_listen_task.await;
	let _ = listener_task.await;
	let _ = maintenance_task.await;

	Ok(())
}

fn main() {
	let matches = cli().get_matches();
	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			eprintln!("failed to start async runtime: {e}");
			std::process::exit(1);
		}
	};
	match runtime.block_on(run(matches)) {
		Ok(()) => std::process::exit(0),
		Err(e) => {
			eprintln!("fatal: {e}");
			std::process::exit(1);
		}
	}
}

// vim: ts=4
