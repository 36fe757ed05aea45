use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Catuskoti filter queries and saved filter stacks", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the parsed filter tree as JSON
    Parse {
        /// Query string, e.g. '+source:chatgpt & words:>100'
        query: String,
    },

    /// Print the compiled backend query as JSON
    Compile {
        query: String,

        /// Page size
        #[clap(short, long)]
        limit: Option<usize>,

        /// Items to skip
        #[clap(short, long)]
        offset: Option<usize>,
    },

    /// Print the canonical form of a query
    Canonical { query: String },

    /// Manage saved filter stacks
    #[command(subcommand)]
    Stack(StackCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum StackCommand {
    /// List saved stacks
    List,

    /// Show one stack with its parsed tree
    Show { name: String },

    /// Save a query under a name
    Add {
        name: String,
        query: String,

        #[clap(short, long)]
        description: Option<String>,

        /// Keyboard shortcut (1-9)
        #[clap(short, long)]
        shortcut: Option<u8>,
    },

    /// Change a stack's query or description
    Update {
        name: String,

        #[clap(short, long)]
        query: Option<String>,

        #[clap(short, long)]
        description: Option<String>,
    },

    Rename { from: String, to: String },

    Delete {
        name: String,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Bind a keyboard shortcut (1-9); omit it to clear
    Shortcut { name: String, shortcut: Option<u8> },

    /// Compile the stack bound to a shortcut
    Run { shortcut: u8 },
}
