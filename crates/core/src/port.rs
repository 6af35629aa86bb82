//! Deterministic port assignment for per-session stream endpoints.
//!
//! A key's preferred port is `base + stable_hash(key) % range`. When that port is
//! held by another key the allocator probes forward, wrapping around the range, so
//! the same key in an otherwise empty range always lands on the same port.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::session::SessionKey;

/// Hash of the key's UTF-8 bytes that is stable across processes and toolchains.
pub fn stable_hash(key: &str) -> u64 {
	let digest = Sha256::digest(key.as_bytes());
	let mut bytes = [0u8; 8];
	bytes.copy_from_slice(&digest[..8]);
	u64::from_be_bytes(bytes)
}

/// Pure allocation step: picks a port for `key` given the ports already held.
///
/// Returns `None` when every port in `[base, base + range)` is held.
pub fn pick_port(key: &str, base: u16, range: u16, is_held: impl Fn(u16) -> bool) -> Option<u16> {
	if range == 0 {
		return None;
	}
	let range_len = u64::from(range);
	let offset = stable_hash(key) % range_len;
	(0..range_len)
		.map(|i| (offset + i) % range_len)
		.filter_map(|slot| u16::try_from(slot).ok())
		.filter_map(|slot| base.checked_add(slot))
		.find(|port| !is_held(*port))
}

#[derive(Debug, Default)]
struct Holdings {
	by_port: BTreeMap<u16, SessionKey>,
	by_key: HashMap<SessionKey, u16>,
}

/// Owns the set of ports held by live sessions.
#[derive(Debug)]
pub struct PortAllocator {
	base: u16,
	range: u16,
	held: Mutex<Holdings>,
}

impl PortAllocator {
	/// Fails when the range is empty or runs past `u16::MAX`.
	pub fn new(base: u16, range: u16) -> Result<Self> {
		if range == 0 {
			return Err(Error::Config("port range must hold at least one port".to_string()));
		}
		if u32::from(base) + u32::from(range) - 1 > u32::from(u16::MAX) {
			return Err(Error::Config(format!("port range {base}+{range} exceeds 65535")));
		}
		Ok(Self {
			base,
			range,
			held: Mutex::new(Holdings::default()),
		})
	}

	pub fn base(&self) -> u16 {
		self.base
	}

	pub fn range(&self) -> u16 {
		self.range
	}

	/// Reserves a port for `key`. A key that already holds a port gets the same one back.
	pub fn allocate(&self, key: &SessionKey) -> Result<u16> {
		let mut held = self.held.lock();
		if let Some(port) = held.by_key.get(key) {
			return Ok(*port);
		}
		let port = pick_port(key.as_str(), self.base, self.range, |p| held.by_port.contains_key(&p)).ok_or(Error::ExhaustedPortRange {
			base: self.base,
			range: self.range,
		})?;
		held.by_port.insert(port, key.clone());
		held.by_key.insert(key.clone(), port);
		Ok(port)
	}

	/// Returns `port` to the pool. Releasing a free port does nothing.
	pub fn release(&self, port: u16) {
		let mut held = self.held.lock();
		if let Some(key) = held.by_port.remove(&port) {
			held.by_key.remove(&key);
		}
	}

	pub fn owner(&self, port: u16) -> Option<SessionKey> {
		self.held.lock().by_port.get(&port).cloned()
	}

	/// Sorted snapshot of held ports.
	pub fn held(&self) -> Vec<u16> {
		self.held.lock().by_port.keys().copied().collect()
	}

	pub fn is_held(&self, port: u16) -> bool {
		self.held.lock().by_port.contains_key(&port)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;

	fn key(s: &str) -> SessionKey {
		SessionKey::new(s).unwrap()
	}

	#[test]
	fn stable_hash_is_fixed() {
		// First 8 bytes of sha256("abc") = ba7816bf8f01cfea.
		assert_eq!(stable_hash("abc"), 0xba78_16bf_8f01_cfea);
	}

	#[test]
	fn same_key_same_port_in_empty_range() {
		let a = PortAllocator::new(9223, 1000).unwrap();
		let b = PortAllocator::new(9223, 1000).unwrap();
		let k = key("thread-42");
		assert_eq!(a.allocate(&k).unwrap(), b.allocate(&k).unwrap());
		let port = a.allocate(&k).unwrap();
		assert_eq!(port, 9223 + (stable_hash("thread-42") % 1000) as u16);
	}

	#[test]
	fn distinct_keys_get_distinct_ports() {
		let alloc = PortAllocator::new(20000, 16).unwrap();
		let ports: HashSet<u16> = (0..16).map(|i| alloc.allocate(&key(&format!("k{i}"))).unwrap()).collect();
		assert_eq!(ports.len(), 16);
		assert!(ports.iter().all(|p| (20000..20016).contains(p)));
	}

	#[test]
	fn probing_wraps_around() {
		let range = 4;
		let preferred = 100 + (stable_hash("wrap") % range) as u16;
		let last = 100 + range as u16 - 1;
		// Hold every port from the preferred one to the end of the range.
		let held: HashSet<u16> = (preferred..=last).collect();
		let picked = pick_port("wrap", 100, range as u16, |p| held.contains(&p));
		if preferred == 100 {
			assert_eq!(picked, None);
		} else {
			assert_eq!(picked, Some(100));
		}
	}

	#[test]
	fn exhausted_range_errors_until_release() {
		let alloc = PortAllocator::new(30000, 1).unwrap();
		let first = alloc.allocate(&key("a")).unwrap();
		assert_eq!(first, 30000);
		let err = alloc.allocate(&key("b")).unwrap_err();
		assert!(matches!(err, Error::ExhaustedPortRange { base: 30000, range: 1 }));
		alloc.release(first);
		assert_eq!(alloc.allocate(&key("b")).unwrap(), 30000);
		assert_eq!(alloc.owner(30000), Some(key("b")));
	}

	#[test]
	fn release_is_idempotent() {
		let alloc = PortAllocator::new(30000, 8).unwrap();
		let port = alloc.allocate(&key("a")).unwrap();
		alloc.release(port);
		alloc.release(port);
		alloc.release(1);
		assert!(alloc.held().is_empty());
	}

	#[test]
	fn reallocating_held_key_does_not_double_reserve() {
		let alloc = PortAllocator::new(30000, 8).unwrap();
		let k = key("a");
		let p1 = alloc.allocate(&k).unwrap();
		let p2 = alloc.allocate(&k).unwrap();
		assert_eq!(p1, p2);
		assert_eq!(alloc.held(), vec![p1]);
	}

	#[test]
	fn rejects_bad_ranges() {
		assert!(PortAllocator::new(9223, 0).is_err());
		assert!(PortAllocator::new(65535, 2).is_err());
		assert!(PortAllocator::new(65535, 1).is_ok());
	}
}
