//! Access-control engine: an append-only, deduplicating table of ACLs
//! referenced by small integer handles.
//!
//! Handle 0 is reserved for the default ACL ("everyone has full access").
//! Structurally identical ACE sets always resolve to the same handle. The
//! table never shrinks; its size is bounded by the number of distinct ACE
//! combinations ever granted, not by object count.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Pseudo-principal matching every caller.
pub const ANYONE: &str = "anyone";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    Read,
    Write,
    All,
}

impl Permission {
    /// `All` implies `Write` and `Read`, `Write` implies `Read`.
    pub fn implies(self, other: Permission) -> bool {
        self >= other
    }
}

/// How an ACL change spreads from a folder to its descendants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AclPropagation {
    /// Apply to the addressed object only.
    ObjectOnly,
    /// Apply to the object and, pre-order, to its current descendants.
    Propagate,
    /// Left to the repository; treated like `Propagate`.
    RepositoryDetermined,
}

/// A single access-control entry: a (principal, permission) pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ace {
    pub principal_id: String,
    pub permission: Permission,
}

impl Ace {
    pub fn new(principal_id: impl Into<String>, permission: Permission) -> Self {
        Self {
            principal_id: principal_id.into(),
            permission,
        }
    }

    /// The grant carried implicitly by handle 0: everyone has full access.
    pub fn default_ace() -> Self {
        Ace::new(ANYONE, Permission::All)
    }
}

/// An unordered, deduplicated set of ACEs. Equality is structural.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    aces: BTreeSet<Ace>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_aces(aces: impl IntoIterator<Item = Ace>) -> Self {
        Self {
            aces: aces.into_iter().collect(),
        }
    }

    /// The ACL represented by handle 0.
    pub fn default_acl() -> Self {
        Self::from_aces([Ace::default_ace()])
    }

    pub fn add(&mut self, ace: Ace) {
        self.aces.insert(ace);
    }

    pub fn remove(&mut self, ace: &Ace) {
        self.aces.remove(ace);
    }

    pub fn contains(&self, ace: &Ace) -> bool {
        self.aces.contains(ace)
    }

    pub fn aces(&self) -> impl Iterator<Item = &Ace> {
        self.aces.iter()
    }

    pub fn len(&self) -> usize {
        self.aces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aces.is_empty()
    }

    /// True if any entry grants `permission` (or a stronger one) to
    /// `principal_id`, either directly or through the `anyone` principal.
    pub fn grants(&self, principal_id: &str, permission: Permission) -> bool {
        self.aces.iter().any(|ace| {
            (ace.principal_id == principal_id || ace.principal_id == ANYONE)
                && ace.permission.implies(permission)
        })
    }
}

/// The deduplicating ACL table.
///
/// Registration of a new combination must happen inside the store's
/// structural-mutation critical section; lookups are safe at any time.
pub struct AclManager {
    // index == handle; entry 0 is the default ACL
    table: RwLock<Vec<Acl>>,
}

impl AclManager {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(vec![Acl::default_acl()]),
        }
    }

    /// Number of registered ACLs, the default one included.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the ACL behind `handle`. Handle 0 and unknown handles map to
    /// the default ACL.
    pub fn get(&self, handle: u32) -> Acl {
        self.table
            .read()
            .get(handle as usize)
            .cloned()
            .unwrap_or_else(Acl::default_acl)
    }

    /// Registers `acl` and returns its handle, deduplicating structurally
    /// identical sets. The empty set maps to handle 0.
    pub fn register(&self, acl: &Acl) -> u32 {
        if acl.is_empty() {
            return 0;
        }
        let mut table = self.table.write();
        if let Some(pos) = table.iter().position(|known| known == acl) {
            return pos as u32;
        }
        table.push(acl.clone());
        (table.len() - 1) as u32
    }

    /// Computes the handle resulting from applying `add`/`remove` deltas to
    /// the ACE set behind `current`.
    ///
    /// An unrestricted object (handle 0) stays unrestricted unless the
    /// "everyone:ALL" grant is explicitly revoked, and adding "everyone:ALL"
    /// collapses any set back to handle 0.
    pub fn resolve(&self, current: u32, add: Option<&Acl>, remove: Option<&Acl>) -> u32 {
        let mut working = if current == 0 {
            Acl::new()
        } else {
            self.get(current)
        };

        if working.is_empty() && add.is_none() && remove.is_none() {
            return 0;
        }

        let removes_default = remove
            .map(|acl| acl.contains(&Ace::default_ace()))
            .unwrap_or(false);

        if current == 0 && !removes_default {
            return 0;
        }

        if let Some(add) = add {
            for ace in add.aces() {
                if *ace == Ace::default_ace() {
                    return 0;
                }
                working.add(ace.clone());
            }
        }

        if let Some(remove) = remove {
            for ace in remove.aces() {
                working.remove(ace);
            }
        }

        if working.is_empty() {
            0
        } else {
            self.register(&working)
        }
    }

    /// Composes deltas with no base object at all (unfiled creates). Unlike
    /// `resolve(0, ..)` there is no unrestricted grant to preserve.
    pub fn compose(&self, add: Option<&Acl>, remove: Option<&Acl>) -> u32 {
        let mut working = Acl::new();
        if let Some(add) = add {
            for ace in add.aces() {
                if *ace == Ace::default_ace() {
                    return 0;
                }
                working.add(ace.clone());
            }
        }
        if let Some(remove) = remove {
            for ace in remove.aces() {
                working.remove(ace);
            }
        }
        if working.is_empty() {
            0
        } else {
            self.register(&working)
        }
    }

    /// Handles of every registered ACL granting `permission` to
    /// `principal_id`. Handle 0 is always included because the default ACL
    /// grants everything to everyone.
    pub fn permitted_handles(&self, principal_id: &str, permission: Permission) -> Vec<u32> {
        self.table
            .read()
            .iter()
            .enumerate()
            .filter(|(_, acl)| acl.grants(principal_id, permission))
            .map(|(idx, _)| idx as u32)
            .collect()
    }

    /// True if the ACL behind `handle` grants `permission` to `principal_id`.
    pub fn grants(&self, handle: u32, principal_id: &str, permission: Permission) -> bool {
        self.permitted_handles(principal_id, permission)
            .contains(&handle)
    }
}

impl Default for AclManager {
    fn default() -> Self {
        Self::new()
    }
}
