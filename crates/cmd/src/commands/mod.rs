// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod dump;
pub mod inspect;
pub mod load;

pub use dump::{DumpArgs, dump_command};
pub use inspect::{InspectArgs, inspect_command};
pub use load::{LoadArgs, load_command};

use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first Ctrl-C
pub(crate) fn cancel_on_interrupt(token: CancellationToken) {
    _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            diagnostics::warn!("Interrupted, stopping before the next object");
            token.cancel();
        }
    });
}
