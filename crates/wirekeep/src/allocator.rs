// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("no free address left in {subnet} ({capacity} client addresses in use)")]
    Exhausted { subnet: Ipv4Network, capacity: u32 },
}

/// Client host range of a subnet.
///
/// The network address and the first host (the server) are reserved, as is
/// the broadcast address, so a `/24` yields `.2` through `.254`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPool {
    subnet: Ipv4Network,
    first: u32,
    last: u32,
}

impl AddressPool {
    pub fn new(subnet: Ipv4Network) -> Self {
        let base = u32::from(subnet.network());
        let broadcast = u32::from(subnet.broadcast());
        Self {
            subnet,
            first: base + 2,
            last: broadcast.saturating_sub(1),
        }
    }

    pub fn capacity(&self) -> u32 {
        (self.last + 1).saturating_sub(self.first)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        (self.first..=self.last).contains(&u32::from(addr))
    }

    /// Lowest address in the pool that is not in `existing`.
    pub fn next_address(&self, existing: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr, AllocError> {
        let candidate = (self.first..=self.last)
            .map(Ipv4Addr::from)
            .find(|addr| !existing.contains(addr));

        match candidate {
            Some(addr) => {
                debug!(address = %addr, used = existing.len(), "allocated address");
                Ok(addr)
            }
            None => Err(AllocError::Exhausted {
                subnet: self.subnet,
                capacity: self.capacity(),
            }),
        }
    }
}
