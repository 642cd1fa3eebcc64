//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comfyflow_comfyui::{ComfyConfig, OutputMode};

#[derive(Debug, Parser)]
#[command(
    name = "comfyflow",
    version,
    about = "Validate, submit and collect ComfyUI workflows"
)]
pub struct Cli {
    /// ComfyUI base URL (overrides COMFY_URL)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Artifact delivery, `file` or `url` (overrides OUTPUT_MODE)
    #[arg(long, global = true)]
    pub output_mode: Option<OutputMode>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Apply command-line overrides on top of the environment config.
    pub fn apply_overrides(&self, config: &mut ComfyConfig) {
        if let Some(url) = &self.url {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(mode) = self.output_mode {
            config.output_mode = mode;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show engine system stats
    Stats,

    /// Check that the engine is reachable
    Check,

    /// Show the running and pending queue
    Queue,

    /// Show execution history, or one prompt's status
    History {
        /// Maximum number of entries
        #[arg(long)]
        limit: Option<u32>,
        /// Show a single prompt (history first, then the queue)
        #[arg(long)]
        prompt_id: Option<String>,
    },

    /// Search or list node types
    Nodes {
        /// Case-insensitive match on name, display name or category
        #[arg(long)]
        search: Option<String>,
        /// Category prefix, e.g. `loaders`
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        output_only: bool,
        #[arg(long)]
        include_deprecated: bool,
        /// Refetch the catalog before reading it
        #[arg(long)]
        refresh: bool,
    },

    /// List model folders, or the files in one folder
    Models { folder: Option<String> },

    /// List installed frontend extensions
    Extensions,

    /// List saved workflows in COMFY_WORKFLOWS_DIR
    Workflows,

    /// List built-in templates, or print one
    Templates {
        name: Option<String>,
        /// Save the template into the workflow directory under this name
        #[arg(long, requires = "name")]
        save: Option<String>,
    },

    /// Validate a workflow file or saved workflow
    Validate {
        workflow: String,
        /// Structural checks only, without fetching the node catalog
        #[arg(long)]
        offline: bool,
    },

    /// Submit a workflow without waiting
    Submit { workflow: String },

    /// Wait for a submitted prompt to finish
    Poll {
        prompt_id: String,
        /// Seconds to wait (overrides POLL_TIMEOUT)
        #[arg(long)]
        timeout: Option<f64>,
        /// Seconds between checks (overrides POLL_INTERVAL)
        #[arg(long)]
        interval: Option<f64>,
    },

    /// Submit a workflow, wait, and collect its output
    Run {
        workflow: String,
        /// Output node id (overrides OUTPUT_NODE_ID)
        #[arg(long)]
        output_node: Option<String>,
        /// Write fetched images into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Generate an image from a text prompt with the configured workflow
    Generate {
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Collect the output of a finished prompt
    #[command(name = "result")]
    GetResult {
        prompt_id: String,
        /// Output node id (overrides OUTPUT_NODE_ID)
        node: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Interrupt the running prompt
    Interrupt {
        /// Only interrupt if this prompt is the one running
        prompt_id: Option<String>,
    },

    /// Remove pending prompts from the queue
    ClearQueue {
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },

    /// Delete history entries
    DeleteHistory {
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },
}
