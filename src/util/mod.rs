// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Utility functions

mod fs;
#[cfg(any(test, feature = "dev"))]
pub(crate) mod testing;
mod text;
mod time;

pub use fs::{copy_file, create_dir_all_with_mode, move_file, walk_files, FileWalk};
pub(crate) use text::normalize;
pub use time::FormattedDuration;
