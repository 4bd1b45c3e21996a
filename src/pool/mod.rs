//! Packet memory pool
//!
//! A fixed-capacity circular byte arena that loans variable-length regions
//! to outgoing packets and reclaims them when the write completes.
//!
//! # Layout
//!
//! ```text
//!            read                         write          end   capacity
//!             │                             │             │       │
//!  ┌──────────▼─────────────────────────────▼─────────────▼───────┐
//!  │  free    │  r0  │ r1 │   r2    │  r3   │    free     │ skip  │
//!  └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Outstanding regions always form one contiguous run (modulo wrap) from
//! `read` to `write`. A region never straddles the wrap boundary: when the
//! tail can't hold a single sample the allocator records `end` and
//! continues at offset 0. `full` disambiguates `read == write`.
//!
//! Regions released out of order are parked by start offset until they
//! become the oldest outstanding region.

mod memory;

pub use memory::{Allocation, AllocationStatus, PacketMemoryPool, PoolRegion};
