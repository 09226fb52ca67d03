// Copyright 2025 rackrpc Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # rackd
//!
//! Command-line front end for the rack controller's region connection
//! service.
//!
//! ## Key Commands
//!
//! - `rackd run`: keep the rack connected to its regions until signalled
//! - `rackd discover`: fetch the region's advertised event-loops once and
//!   print them as JSON
//!
//! When the last region connection is lost, `run` stops the dependent
//! services (`dhcpd`, `dhcpd6` by default) through [`systemd::SystemdMonitor`].

pub mod report;
pub mod systemd;
