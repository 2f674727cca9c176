use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

/// Global override for board directory (set by -C flag)
static BOARD_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::cache::LocalCache;
use crate::io::config_io::{self, BoardHome, ConfigError};
use crate::io::lock::BoardLock;
use crate::io::memory_store::{FileTailStore, MemoryStore, StoreFileError};
use crate::io::state;
use crate::model::notice::{Notifier, PrintNotifier, Toast, ToastLevel, ToastLog};
use crate::model::view_state::{
    BoardViewMode, FilterField, FilterValue, SortDirection, SortField, SortState,
};
use crate::ops::alerts::{AlertPoller, PollOutcome, PollSettings};
use crate::ops::board::Board;
use crate::ops::duplicates::duplicate_clusters;
use crate::ops::loader;
use crate::ops::mutation::{
    MoveEngine, MoveError, MoveKind, MoveOutcome, assignment_label, tranche_target,
};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub async fn dispatch(cli: Cli) -> CmdResult {
    let json = cli.json;

    // Store -C override for load_home_cwd()
    if let Some(ref dir) = cli.board_dir {
        let abs = std::fs::canonicalize(dir)
            .map_err(|e| format!("cannot resolve -C path '{}': {}", dir, e))?;
        if let Ok(mut slot) = BOARD_DIR_OVERRIDE.lock() {
            slot.replace(abs);
        }
    }

    match cli.command {
        // Read commands
        Commands::List(args) => cmd_list(args, json).await,
        Commands::Board(args) => cmd_board(args, json).await,
        Commands::Dups => cmd_dups(json).await,
        Commands::Alerts => cmd_alerts(json).await,
        Commands::Whoami(args) => cmd_whoami(args, json).await,

        // View preferences
        Commands::Collapse(args) => cmd_collapse(args, true),
        Commands::Expand(args) => cmd_collapse(args, false),

        // Write commands
        Commands::MoveStage(args) => cmd_move_stage(args, json).await,
        Commands::MoveTranche(args) => cmd_move_tranche(args, json).await,
        Commands::Ack(args) => cmd_ack(args, json).await,
        Commands::AckAll => cmd_ack_all(json).await,

        Commands::Watch(args) => cmd_watch(args, json).await,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_home_cwd() -> Result<BoardHome, ConfigError> {
    let overridden = BOARD_DIR_OVERRIDE
        .lock()
        .ok()
        .and_then(|slot| slot.as_ref().cloned());
    let start = match overridden {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(|e| ConfigError::ReadError {
            path: PathBuf::from("."),
            source: e,
        })?,
    };
    config_io::load_home(&start)
}

/// Open the board's local record store. A board without a store file starts
/// empty.
fn open_store(home: &BoardHome) -> Result<Arc<MemoryStore>, StoreFileError> {
    let path = home.store_path();
    if !path.exists() {
        tracing::warn!(path = %path.display(), "store file missing, starting empty");
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(MemoryStore::load(&path)?))
}

async fn load_board_cwd() -> Result<(BoardHome, Arc<MemoryStore>, Board), Box<dyn std::error::Error>> {
    let home = load_home_cwd()?;
    let store = open_store(&home)?;
    let board = loader::load_board(store.as_ref(), &home.config).await?;
    Ok((home, store, board))
}

fn apply_filters(board: &mut Board, args: &FilterArgs) -> CmdResult {
    if let Some(ref term) = args.search {
        board.set_filter(FilterField::SearchTerm, FilterValue::Text(term.clone()))?;
    }
    let sets = [
        (FilterField::TagIds, &args.tags),
        (FilterField::WorkRequiredFlags, &args.flags),
        (FilterField::SalesRepNames, &args.reps),
        (FilterField::SalesOrgNames, &args.orgs),
        (FilterField::ProjectTypes, &args.types),
    ];
    for (field, values) in sets {
        if !values.is_empty() {
            board.set_filter(field, FilterValue::set_of(values.iter().cloned()))?;
        }
    }
    if let Some(ref v) = args.cash_deal {
        board.set_filter(FilterField::CashDeal, FilterValue::Flag(parse_tristate(v)?))?;
    }
    if let Some(ref v) = args.need_help {
        board.set_filter(FilterField::NeedHelp, FilterValue::Flag(parse_tristate(v)?))?;
    }
    if args.only_duplicates {
        board.set_filter(FilterField::OnlyDuplicates, FilterValue::Toggle(true))?;
    }
    Ok(())
}

/// Print collected toasts. Error toasts are left to the returned error.
fn print_toasts(log: &ToastLog, json: bool) {
    if json {
        return;
    }
    for toast in log.take() {
        if toast.level != ToastLevel::Error {
            println!("{}", toast);
        }
    }
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

async fn cmd_list(args: ListArgs, json: bool) -> CmdResult {
    let (home, _store, mut board) = load_board_cwd().await?;
    apply_filters(&mut board, &args.filter)?;

    let mut cache = LocalCache::open(&home.cache_path());
    if args.reset {
        state::clear_sort(&mut cache);
    }
    let sort = match args.sort {
        Some(ref name) => {
            let field: SortField = name.parse()?;
            let direction = if args.desc { SortDirection::Desc } else { SortDirection::Asc };
            let sort = SortState { field, direction };
            state::write_sort(&mut cache, &sort)?;
            sort
        }
        None => {
            let mut sort = state::read_sort(&mut cache).unwrap_or_default();
            if args.asc {
                sort.direction = SortDirection::Asc;
            } else if args.desc {
                sort.direction = SortDirection::Desc;
            }
            sort
        }
    };
    cache.save()?;
    board.set_sort(sort.field, sort.direction);

    let view = board.view();
    let duplicates = board.duplicates();
    if json {
        let items: Vec<ItemJson> = view
            .visible
            .iter()
            .map(|i| item_to_json(i, &duplicates))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for item in &view.visible {
            println!("{}", format_item_line(item, duplicates.contains(&item.id)));
        }
    }
    Ok(())
}

async fn cmd_board(args: BoardArgs, json: bool) -> CmdResult {
    let (home, _store, mut board) = load_board_cwd().await?;
    apply_filters(&mut board, &args.filter)?;
    let mode: BoardViewMode = args.mode.parse()?;
    board.set_board_view_mode(mode);
    board.set_stage_view(args.view.clone());

    let mut cache = LocalCache::open(&home.cache_path());
    if let Some(sort) = state::read_sort(&mut cache) {
        board.set_sort(sort.field, sort.direction);
    }
    let collapsed = state::read_collapsed(&mut cache);

    let view = board.view();
    let duplicates = board.duplicates();
    let columns: Vec<_> = view.columns.values().collect();
    if json {
        let out = board_to_json(mode, &columns, &view.stats, &collapsed, &duplicates);
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for column in &columns {
            let stats = view.stats.per_column.get(&column.key).cloned().unwrap_or_default();
            for line in format_column(column, &stats, is_collapsed(&collapsed, &column.key), &duplicates) {
                println!("{}", line);
            }
        }
        println!();
        println!("{}", format_totals(&view.stats));
    }
    Ok(())
}

async fn cmd_dups(json: bool) -> CmdResult {
    let (_home, _store, board) = load_board_cwd().await?;
    let clusters = duplicate_clusters(board.items());
    if json {
        let out: Vec<ClusterJson> = clusters.iter().map(cluster_to_json).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if clusters.is_empty() {
        println!("no duplicates");
    } else {
        for cluster in &clusters {
            println!("{}", format_cluster(cluster));
        }
    }
    Ok(())
}

async fn cmd_whoami(args: WhoamiArgs, json: bool) -> CmdResult {
    let home = load_home_cwd()?;
    let mut cache = LocalCache::open(&home.cache_path());
    let cached = if args.refresh {
        None
    } else {
        state::read_profile(&mut cache)
    };
    let profile = match cached {
        Some(profile) => profile,
        None => {
            let store = open_store(&home)?;
            let profile = loader::fetch_profile(store.as_ref(), &home.config).await?;
            state::write_profile(&mut cache, &profile)?;
            profile
        }
    };
    cache.save()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        match profile.email {
            Some(ref email) => println!("{} ({}) <{}>", profile.name, profile.id, email),
            None => println!("{} ({})", profile.name, profile.id),
        }
    }
    Ok(())
}

fn cmd_collapse(args: ColumnArgs, collapsed: bool) -> CmdResult {
    let home = load_home_cwd()?;
    let mut cache = LocalCache::open(&home.cache_path());
    state::set_collapsed(&mut cache, &args.column, collapsed)?;
    cache.save()?;
    let verb = if collapsed { "collapsed" } else { "expanded" };
    println!("{} {}", verb, args.column);
    Ok(())
}

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

async fn cmd_move_stage(args: MoveStageArgs, json: bool) -> CmdResult {
    run_move(&args.item, MoveKind::Stage, json, |engine, item| {
        let stage = args.stage.clone();
        async move { engine.request_stage_move(&item, &stage).await }
    })
    .await
}

async fn cmd_move_tranche(args: MoveTrancheArgs, json: bool) -> CmdResult {
    let target = tranche_target(&args.tranche).map(str::to_string);
    run_move(&args.item, MoveKind::Tranche, json, |engine, item| async move {
        engine.request_tranche_move(&item, target.as_deref()).await
    })
    .await
}

/// Load, run one move through the engine, flush background writes and save
/// the store, all under the board lock.
async fn run_move<F, Fut>(item_id: &str, kind: MoveKind, json: bool, request: F) -> CmdResult
where
    F: FnOnce(Arc<MoveEngine>, String) -> Fut,
    Fut: Future<Output = Result<MoveOutcome, MoveError>>,
{
    let home = load_home_cwd()?;
    let _lock = BoardLock::acquire_default(&home.board_dir).await?;
    let store = open_store(&home)?;
    let board = loader::load_board(store.as_ref(), &home.config).await?;

    let log = Arc::new(ToastLog::new());
    let engine = Arc::new(MoveEngine::new(
        board.into_shared(),
        store.clone(),
        log.clone(),
        &home.config.sources,
        home.config.board.user_id.clone(),
    ));
    let result = request(engine.clone(), item_id.to_string()).await;
    engine.background().drain().await;
    store.save(&home.store_path())?;

    print_toasts(&log, json);
    let outcome = result?;

    if json {
        let out = match &outcome {
            MoveOutcome::Unchanged => MoveJson {
                item: item_id.to_string(),
                field: kind.to_string(),
                changed: false,
                from: None,
                to: None,
            },
            MoveOutcome::Committed { from, to } => MoveJson {
                item: item_id.to_string(),
                field: kind.to_string(),
                changed: true,
                from: Some(assignment_label(&kind, from)),
                to: Some(assignment_label(&kind, to)),
            },
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if outcome == MoveOutcome::Unchanged {
        println!("{} is already in that {}", item_id, kind);
    }
    Ok(())
}

fn new_poller(
    home: &BoardHome,
    store: Arc<MemoryStore>,
    notifier: Arc<dyn Notifier>,
) -> AlertPoller {
    AlertPoller::new(store, notifier, PollSettings::from_config(&home.config))
}

async fn cmd_alerts(json: bool) -> CmdResult {
    let home = load_home_cwd()?;
    let store = open_store(&home)?;
    let poller = new_poller(&home, store, Arc::new(ToastLog::new()));
    if let PollOutcome::Failed(e) = poller.poll_once().await {
        return Err(e.into());
    }
    let alerts = poller.unacknowledged();
    if json {
        println!("{}", serde_json::to_string_pretty(&alerts)?);
    } else if alerts.is_empty() {
        println!("no unread alerts");
    } else {
        for alert in &alerts {
            println!("{}", format_alert_line(alert));
        }
    }
    Ok(())
}

async fn cmd_ack(args: AckArgs, json: bool) -> CmdResult {
    let home = load_home_cwd()?;
    let _lock = BoardLock::acquire_default(&home.board_dir).await?;
    let store = open_store(&home)?;
    let log = Arc::new(ToastLog::new());
    let poller = new_poller(&home, store.clone(), log.clone());
    poller.poll_once().await;

    let result = poller.acknowledge(&args.id).await;
    store.save(&home.store_path())?;
    result?;

    if json {
        println!("{}", serde_json::json!({ "acknowledged": [args.id] }));
    } else {
        println!("marked {} as read", args.id);
    }
    Ok(())
}

async fn cmd_ack_all(json: bool) -> CmdResult {
    let home = load_home_cwd()?;
    let _lock = BoardLock::acquire_default(&home.board_dir).await?;
    let store = open_store(&home)?;
    let log = Arc::new(ToastLog::new());
    let poller = new_poller(&home, store.clone(), log.clone());
    poller.poll_once().await;
    let ids: Vec<String> = poller.unacknowledged().into_iter().map(|a| a.id).collect();

    let result = poller.acknowledge_all().await;
    store.save(&home.store_path())?;
    result?;

    if json {
        println!("{}", serde_json::json!({ "acknowledged": ids }));
    } else {
        println!("marked {} alerts as read", ids.len());
    }
    Ok(())
}

/// Notifier printing each toast as one JSON line.
struct JsonLineNotifier;

impl Notifier for JsonLineNotifier {
    fn notify(&self, toast: Toast) {
        match serde_json::to_string(&toast) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "could not serialize toast"),
        }
    }
}

async fn cmd_watch(args: WatchArgs, json: bool) -> CmdResult {
    let home = load_home_cwd()?;
    let store = open_store(&home)?;
    let remote = Arc::new(FileTailStore::new(store, home.store_path()));
    let notifier: Arc<dyn Notifier> = if json {
        Arc::new(JsonLineNotifier)
    } else {
        Arc::new(PrintNotifier)
    };
    let mut settings = PollSettings::from_config(&home.config);
    if let Some(secs) = args.interval {
        settings.interval = Duration::from_secs(secs.max(1));
    }
    let poller = Arc::new(AlertPoller::new(remote, notifier, settings));

    let mut outcomes = poller.subscribe();
    poller.start_polling();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut cycles = 0usize;
    loop {
        let received = tokio::select! {
            _ = &mut ctrl_c => break,
            received = outcomes.recv() => received,
        };
        match received {
            Ok(PollOutcome::Skipped) => continue,
            Ok(PollOutcome::Baseline { count }) if !json => {
                println!("watching: {} unread alerts (Ctrl-C to stop)", count);
            }
            Ok(PollOutcome::Failed(e)) => eprintln!("warning: alert poll failed: {}", e),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "watch fell behind the poller");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
        cycles += 1;
        if args.cycles.is_some_and(|limit| cycles >= limit) {
            break;
        }
    }
    poller.stop_polling();
    Ok(())
}
