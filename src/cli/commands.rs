use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bsync", about = concat!("bsync v", env!("CARGO_PKG_VERSION"), " - project board state and sync"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against a different board directory
    #[arg(short = 'C', long = "board-dir", global = true)]
    pub board_dir: Option<String>,

    /// Verbose logging to stderr (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List visible items, filtered and sorted
    List(ListArgs),
    /// Show board columns with counts and capacity totals
    Board(BoardArgs),
    /// Collapse a board column
    Collapse(ColumnArgs),
    /// Expand a collapsed board column
    Expand(ColumnArgs),
    /// Show items sharing a location
    Dups,
    /// Move an item to another stage
    MoveStage(MoveStageArgs),
    /// Move an item to another tranche (or `unassigned`)
    MoveTranche(MoveTrancheArgs),
    /// List unread alerts
    Alerts,
    /// Mark one alert as read
    Ack(AckArgs),
    /// Mark all alerts as read
    AckAll,
    /// Poll for new alerts and print them as they arrive
    Watch(WatchArgs),
    /// Show the current user's profile
    Whoami(WhoamiArgs),
}

// ---------------------------------------------------------------------------
// Read command args
// ---------------------------------------------------------------------------

#[derive(Args, Default)]
pub struct FilterArgs {
    /// Match owner, address, rep or external id (case-insensitive)
    #[arg(long)]
    pub search: Option<String>,
    /// Only items with this tag (repeatable; any match)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Only items with this work flag (repeatable; any match)
    #[arg(long = "flag")]
    pub flags: Vec<String>,
    /// Only items of this sales rep (repeatable)
    #[arg(long = "rep")]
    pub reps: Vec<String>,
    /// Only items of this sales org (repeatable)
    #[arg(long = "org")]
    pub orgs: Vec<String>,
    /// Only items of this project type (repeatable)
    #[arg(long = "type")]
    pub types: Vec<String>,
    /// Cash deals: yes, no or any
    #[arg(long)]
    pub cash_deal: Option<String>,
    /// Needs help: yes, no or any
    #[arg(long)]
    pub need_help: Option<String>,
    /// Only items sharing a location with another item
    #[arg(long)]
    pub only_duplicates: bool,
}

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
    /// Sort field (saved as the last-used sort)
    #[arg(long)]
    pub sort: Option<String>,
    /// Sort ascending
    #[arg(long, conflicts_with = "desc")]
    pub asc: bool,
    /// Sort descending
    #[arg(long)]
    pub desc: bool,
    /// Forget the saved sort and use the default
    #[arg(long)]
    pub reset: bool,
}

#[derive(Args)]
pub struct BoardArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
    /// Group columns by stage or tranche
    #[arg(long, default_value = "stage")]
    pub mode: String,
    /// Only stages of this sub-board (e.g. sales, install)
    #[arg(long)]
    pub view: Option<String>,
}

#[derive(Args)]
pub struct ColumnArgs {
    /// Column key (stage id, tranche id, or `unassigned`)
    pub column: String,
}

// ---------------------------------------------------------------------------
// Write command args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct MoveStageArgs {
    /// Item ID
    pub item: String,
    /// Target stage ID
    pub stage: String,
}

#[derive(Args)]
pub struct MoveTrancheArgs {
    /// Item ID
    pub item: String,
    /// Target tranche ID, or `unassigned`
    pub tranche: String,
}

#[derive(Args)]
pub struct AckArgs {
    /// Alert ID
    pub id: String,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Seconds between polls (default: from board.toml)
    #[arg(long)]
    pub interval: Option<u64>,
    /// Stop after this many poll cycles
    #[arg(long)]
    pub cycles: Option<usize>,
}

#[derive(Args)]
pub struct WhoamiArgs {
    /// Ignore the cached profile
    #[arg(long)]
    pub refresh: bool,
}
