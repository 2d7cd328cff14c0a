// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Package Python programs as macOS application and plug-in bundles.

Given the scripts of a program and a Python installation, this library
finds the modules the program needs, lays out a `.app` or `.plugin` bundle
with launchers, the Python code and the resources, copies the native
libraries the bundle links against into it and signs the result.

This library exposes that functionality to other tools. The `py2app`
binary is a thin command line interface on top of it.
*/

pub mod audit;
pub mod bootstrap;
pub mod builder;
pub mod bundle;
pub mod cli;
pub mod codesign;
pub mod config;
pub mod environment;
pub mod error;
pub mod graph;
pub mod launcher;
pub mod payload;
pub mod progress;
pub mod recipes;
pub mod resources;
pub mod standalone;
pub mod strip;
pub mod tools;

#[cfg(test)]
mod testutil;
