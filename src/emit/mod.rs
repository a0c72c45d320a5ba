// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Rendering of cooked configuration into file contents.
//!
//! The [`cook`](crate::cook) module decides *what* each server set
//! serves; this module decides what the bytes look like. [`zone_file`]
//! renders master files (and the root-hints file), and [`named_conf`]
//! renders the two named.conf variants.

mod named;
mod zone;

pub use named::named_conf;
pub use zone::{zone_file, GENERATED_HEADER};
