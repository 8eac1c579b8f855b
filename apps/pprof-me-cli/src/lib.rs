// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

pub mod client;

pub use client::{
    binary_fingerprint, binary_name, capture_profile, fetch_profile, fetch_profile_to_file,
    list_profiles, ui_url, upload_app_name, upload_profile, ClientResult,
};
