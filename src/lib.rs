//! branchenv: per-branch review environments.
//!
//! The Initializer turns a CI trigger into a descriptor (compose manifest, env file,
//! status marker) in a shared store, exactly once per Branch Identifier. The
//! Reconciler periodically reads every descriptor and drives `docker compose` so
//! that running container groups match the status markers.

pub mod branch;
pub mod color;
pub mod config;
pub mod effector;
pub mod errors;
pub mod initializer;
pub mod lock;
pub mod logging;
pub mod reconciler;
pub mod store;
pub mod template;
pub mod util;

pub use branch::{normalize, BranchId};
pub use color::{
    color_enabled_stderr, log_error_stderr, log_info_stderr, log_warn_stderr, paint,
    set_color_mode, ColorMode,
};
pub use config::{Config, InitialStatus};
pub use effector::{ComposeEffector, ComposeFlavor, DockerCompose};
pub use errors::{
    exit_code_for_init_error, exit_code_for_io_error, exit_code_for_reconcile_error,
    exit_code_for_store_error, EffectorError, ExecError, InitError, ReconcileError, RenderError,
    StoreError,
};
pub use initializer::{InitOutcome, InitSettings, Initializer, Trigger, TriggerVars};
pub use lock::{acquire_lock_at, lock_path_for, try_acquire_lock_at, LockPurpose, StoreLock};
pub use logging::init_logging;
pub use reconciler::{
    snapshot, BranchOutcome, BranchReport, InactivePolicy, ReconcileReport, Reconciler,
};
pub use store::{
    DescriptorStore, FsStore, GitSync, MemoryStore, StatusMarker, ENV_FILE, MANIFEST_FILE,
    STATUS_FILE,
};
pub use template::{RenderedSet, TemplateSet};
