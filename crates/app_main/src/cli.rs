use app_core::TranscodeOptions;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "streamvio")]
#[command(version, about = "StreamVio media server administration", long_about = None)]
pub struct Cli {
    /// Configuration file (platform config dir by default)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List top-level locations the service can browse from
    Roots,
    /// List the contents of a directory
    Browse { path: String },
    /// Create a directory (existing directories are fine)
    Mkdir { path: String },
    /// Create the default media folder under the discovered roots
    MediaFolder,
    /// Check whether the service account can use a path
    Check { path: String },
    /// Try to give the service account access to a path
    Repair { path: String },
    /// Manage media libraries
    #[command(subcommand)]
    Library(LibraryCommand),
    /// Run transcode jobs; Ctrl-C cancels
    #[command(subcommand)]
    Job(JobCommand),
}

#[derive(Debug, Subcommand)]
pub enum LibraryCommand {
    /// Register a library
    Add(LibraryArgs),
    /// List libraries
    List,
    /// Show one library
    Show { id: String },
    /// Replace a library's fields
    Edit {
        id: String,
        #[command(flatten)]
        args: LibraryArgs,
    },
    /// Delete a library without an active job
    Rm { id: String },
    /// Scan a library and wait for the result
    Scan { id: String },
}

#[derive(Debug, Args)]
pub struct LibraryArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub path: String,
    /// movies, series, music or photos
    #[arg(long = "type")]
    pub library_type: String,
    /// Scan right after the library is added
    #[arg(long)]
    pub scan_automatically: bool,
}

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Transcode a media file and wait for it
    Transcode {
        media_id: String,
        input: String,
        /// Output file (transcode dir by default)
        #[arg(long)]
        output: Option<String>,
        #[command(flatten)]
        options: TranscodeArgs,
    },
    /// Package a media file as HLS and wait for it
    Hls {
        media_id: String,
        input: String,
        /// Output directory (transcode dir by default)
        #[arg(long)]
        output_dir: Option<String>,
        #[command(flatten)]
        options: TranscodeArgs,
    },
}

#[derive(Debug, Args)]
pub struct TranscodeArgs {
    #[arg(long)]
    pub format: Option<String>,
    #[arg(long)]
    pub vcodec: Option<String>,
    #[arg(long)]
    pub acodec: Option<String>,
    /// Video bitrate in kbit/s
    #[arg(long)]
    pub vbitrate: Option<u32>,
    /// Audio bitrate in kbit/s
    #[arg(long)]
    pub abitrate: Option<u32>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    /// Disable hardware acceleration
    #[arg(long)]
    pub no_hwaccel: bool,
}

impl From<TranscodeArgs> for TranscodeOptions {
    fn from(args: TranscodeArgs) -> Self {
        TranscodeOptions {
            output_format: args.format,
            video_codec: args.vcodec,
            audio_codec: args.acodec,
            video_bitrate_kbps: args.vbitrate,
            audio_bitrate_kbps: args.abitrate,
            width: args.width,
            height: args.height,
            hardware_acceleration: !args.no_hwaccel,
        }
    }
}
