// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod actor;
mod envelope;
mod mailbox;
mod registry;

pub use actor::{
    behavior, ActorContext, ActorRef, ActorSystem, Behavior, EventSink, MeshError, MeshEvent,
    SpawnOptions,
};
pub use envelope::{Envelope, EnvelopeKind, Priority};
pub use mailbox::Mailbox;
pub use registry::{AgentQuery, AgentRegistry, AgentRegistryEntry, AgentStatus, RegistryError};
