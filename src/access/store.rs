//! Durable grant relation plus the identity records it refers to.
//!
//! Grants are stored as one `PermissionMask` per (subject, grantee). Every
//! mutation takes the lock of each subject it touches first, so the
//! authorization check and the write form one unit relative to other
//! mutations of those subjects. Grants and revokes also lock the grantee's
//! key, which orders them against that key's deletion. Locks are taken in
//! `Subject` order and exist only while their subject does.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::PlatformError;
use crate::primitives::{Key, Permission, User};
use crate::rights::{self, PermissionMask};
use crate::types::{KeyId, PermissionType, Subject, UserId};

#[derive(Default)]
pub struct PermissionStore {
    users: RwLock<HashMap<UserId, User>>,
    keys: DashMap<KeyId, Key>,
    tokens: DashMap<String, KeyId>,
    owners: DashMap<Subject, UserId>,
    grants: DashMap<Subject, HashMap<KeyId, PermissionMask>>,
    subject_locks: DashMap<Subject, Arc<Mutex<()>>>,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Identity records ----------------------------------------------------

    /// Registers a user under a unique name together with its primary key.
    pub fn register_user(&self, name: &str) -> Result<(User, Key), PlatformError> {
        let mut users = self.users.write();
        if users.values().any(|u| u.name == name) {
            return Err(PlatformError::DuplicateUser(name.to_string()));
        }
        let user_id = UserId::new();
        let key = Key::generate(user_id, name, true);
        let user = User {
            id: user_id,
            name: name.to_string(),
            primary_key: key.id,
        };
        self.insert_key(key.clone());
        self.owners.insert(Subject::User(user_id), user_id);
        users.insert(user_id, user.clone());
        tracing::info!(user = %user_id, name, "registered user");
        Ok((user, key))
    }

    pub fn user(&self, id: &UserId) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    pub fn user_by_name(&self, name: &str) -> Option<User> {
        self.users.read().values().find(|u| u.name == name).cloned()
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    pub fn key(&self, id: &KeyId) -> Option<Key> {
        self.keys.get(id).map(|k| k.value().clone())
    }

    pub fn key_by_token(&self, token: &str) -> Option<Key> {
        let id = *self.tokens.get(token)?.value();
        self.key(&id)
    }

    pub fn keys_of(&self, user: &UserId) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .keys
            .iter()
            .filter(|k| k.user == *user)
            .map(|k| k.value().clone())
            .collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        keys
    }

    /// Creates a secondary key for `user`. Requires CREATE on the user.
    pub fn create_key(&self, acting: &Key, user: UserId, name: &str) -> Result<Key, PlatformError> {
        let subject = Subject::User(user);
        self.with_locked(&[subject], || {
            self.require(acting, subject, PermissionType::Create)?;
            if self.keys.iter().any(|k| k.user == user && k.name == name) {
                return Err(PlatformError::InvalidRequest(format!(
                    "key {} already exists for user {}",
                    name, user
                )));
            }
            let key = Key::generate(user, name, false);
            self.insert_key(key.clone());
            tracing::info!(key = %key.id, user = %user, name, "created key");
            Ok(key)
        })
    }

    /// Deletes a secondary key and every grant naming it, as grantee or subject.
    /// Requires DELETE on the key itself or on its owning user.
    pub fn delete_key(&self, acting: &Key, target: &KeyId) -> Result<(), PlatformError> {
        let subject = Subject::Key(*target);
        self.with_locked(&[subject], || {
            let key = self
                .key(target)
                .ok_or_else(|| PlatformError::KeyNotFound(target.to_string()))?;
            if key.primary {
                return Err(PlatformError::InvalidRequest(
                    "a user's primary key cannot be deleted".to_string(),
                ));
            }
            let allowed = self.has_permission(&acting.id, subject, PermissionType::Delete)
                || self.has_permission(&acting.id, Subject::User(key.user), PermissionType::Delete);
            if !allowed {
                tracing::warn!(acting = %acting.id, target = %target, "key deletion denied");
                return Err(PlatformError::InsufficientPermissions {
                    subject,
                    permission: PermissionType::Delete,
                });
            }

            self.keys.remove(target);
            self.tokens.remove(key.secret());
            self.owners.remove(&subject);
            self.grants.remove(&subject);
            for mut entry in self.grants.iter_mut() {
                entry.value_mut().remove(target);
            }
            self.grants.retain(|_, grantees| !grantees.is_empty());
            tracing::info!(key = %target, "deleted key");
            Ok(())
        })
    }

    fn insert_key(&self, key: Key) {
        self.tokens.insert(key.secret().to_string(), key.id);
        self.owners.insert(Subject::Key(key.id), key.user);
        self.keys.insert(key.id, key);
    }

    // --- Subjects ------------------------------------------------------------

    pub fn owner_of(&self, subject: &Subject) -> Option<UserId> {
        self.owners.get(subject).map(|o| *o.value())
    }

    /// Makes a subject known to the store. Called when a lambda is first saved.
    pub(crate) fn register_subject(&self, subject: Subject, owner: UserId) {
        self.owners.insert(subject, owner);
    }

    /// Drops a subject and every grant held on it. Called when a lambda is deleted.
    pub(crate) fn forget_subject(&self, subject: &Subject) {
        let forgotten = self.with_locked(&[*subject], || {
            self.owners.remove(subject);
            self.grants.remove(subject);
            Ok(())
        });
        if forgotten.is_err() {
            tracing::debug!(%subject, "subject already forgotten");
        }
    }

    /// Runs `op` holding the lock of every subject in `subjects`. An unknown
    /// subject fails with its not-found error before any lock entry is made,
    /// and entries of subjects that `op` removed are dropped afterwards.
    fn with_locked<T>(
        &self,
        subjects: &[Subject],
        op: impl FnOnce() -> Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        self.require_known(subjects)?;
        let mut ordered = subjects.to_vec();
        ordered.sort();
        ordered.dedup();
        let locks: Vec<(Subject, Arc<Mutex<()>>)> = ordered
            .into_iter()
            .map(|subject| (subject, self.subject_locks.entry(subject).or_default().value().clone()))
            .collect();

        let result = {
            let _guards: Vec<_> = locks.iter().map(|(_, lock)| lock.lock()).collect();
            self.require_known(subjects).and_then(|()| op())
        };

        for (subject, lock) in &locks {
            if self.owner_of(subject).is_none() {
                self.subject_locks.remove_if(subject, |_, held| Arc::ptr_eq(held, lock));
            }
        }
        result
    }

    fn require_known(&self, subjects: &[Subject]) -> Result<(), PlatformError> {
        match subjects.iter().find(|subject| self.owner_of(subject).is_none()) {
            Some(Subject::User(id)) => Err(PlatformError::UserNotFound(id.to_string())),
            Some(Subject::Lambda(id)) => Err(PlatformError::LambdaNotFound(id.to_string())),
            Some(Subject::Key(id)) => Err(PlatformError::KeyNotFound(id.to_string())),
            None => Ok(()),
        }
    }

    // --- Checks --------------------------------------------------------------

    /// True iff `key` holds `kind` on `subject`, explicitly or as the primary
    /// key of the subject's owner.
    pub fn has_permission(&self, key: &KeyId, subject: Subject, kind: PermissionType) -> bool {
        let (primary, user) = match self.keys.get(key) {
            Some(k) => (k.primary, k.user),
            None => return false,
        };
        if primary && self.owner_of(&subject) == Some(user) {
            return true;
        }
        let held = self
            .grants
            .get(&subject)
            .and_then(|grantees| grantees.get(key).copied())
            .unwrap_or(0);
        rights::sufficient(held, rights::bit(kind))
    }

    /// Whether `acting` may grant or revoke on `subject`: GRANT on the subject,
    /// or GRANT on the user owning it.
    pub fn may_grant(&self, acting: &KeyId, subject: Subject) -> bool {
        if self.has_permission(acting, subject, PermissionType::Grant) {
            return true;
        }
        match (subject, self.owner_of(&subject)) {
            (Subject::User(_), _) | (_, None) => false,
            (_, Some(owner)) => {
                self.has_permission(acting, Subject::User(owner), PermissionType::Grant)
            }
        }
    }

    /// Fails with `InsufficientPermissions` unless `acting` holds `kind` on `subject`.
    pub fn require(&self, acting: &Key, subject: Subject, kind: PermissionType) -> Result<(), PlatformError> {
        if self.has_permission(&acting.id, subject, kind) {
            Ok(())
        } else {
            tracing::warn!(acting = %acting.id, %subject, permission = %kind, "permission denied");
            Err(PlatformError::InsufficientPermissions {
                subject,
                permission: kind,
            })
        }
    }

    // --- Grants --------------------------------------------------------------

    /// Adds (grantee, subject, kind). Granting a held permission is a no-op.
    pub fn grant_permission(
        &self,
        acting: &Key,
        grantee: &KeyId,
        subject: Subject,
        kind: PermissionType,
    ) -> Result<(), PlatformError> {
        self.with_locked(&[Subject::Key(*grantee), subject], || {
            self.check_grant(acting, subject)?;
            let mut grantees = self.grants.entry(subject).or_default();
            *grantees.entry(*grantee).or_insert(0) |= rights::bit(kind);
            tracing::info!(acting = %acting.id, grantee = %grantee, %subject, permission = %kind, "granted permission");
            Ok(())
        })
    }

    /// Removes (grantee, subject, kind). Revoking an unheld permission is a no-op.
    pub fn revoke_permission(
        &self,
        acting: &Key,
        grantee: &KeyId,
        subject: Subject,
        kind: PermissionType,
    ) -> Result<(), PlatformError> {
        self.with_locked(&[Subject::Key(*grantee), subject], || {
            self.check_grant(acting, subject)?;
            let now_empty = match self.grants.get_mut(&subject) {
                Some(mut grantees) => {
                    if let Some(mask) = grantees.get_mut(grantee) {
                        *mask &= !rights::bit(kind);
                        if *mask == 0 {
                            grantees.remove(grantee);
                        }
                    }
                    grantees.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.grants.remove_if(&subject, |_, grantees| grantees.is_empty());
            }
            tracing::info!(acting = %acting.id, grantee = %grantee, %subject, permission = %kind, "revoked permission");
            Ok(())
        })
    }

    fn check_grant(&self, acting: &Key, subject: Subject) -> Result<(), PlatformError> {
        if !self.may_grant(&acting.id, subject) {
            tracing::warn!(acting = %acting.id, %subject, "grant/revoke denied");
            return Err(PlatformError::InsufficientPermissions {
                subject,
                permission: PermissionType::Grant,
            });
        }
        Ok(())
    }

    // --- Introspection -------------------------------------------------------

    /// Every explicit triple naming `key` as grantee.
    pub fn permissions(&self, key: &KeyId) -> BTreeSet<Permission> {
        let mut out = BTreeSet::new();
        for entry in self.grants.iter() {
            if let Some(mask) = entry.value().get(key) {
                for kind in rights::kinds(*mask) {
                    out.insert(Permission {
                        grantee: *key,
                        subject: *entry.key(),
                        kind,
                    });
                }
            }
        }
        out
    }

    /// The subset of `key`'s permissions that `acting` is allowed to see,
    /// which are those on subjects `acting` may grant on.
    pub fn visible_permissions(&self, acting: &Key, key: &KeyId) -> BTreeSet<Permission> {
        self.permissions(key)
            .into_iter()
            .filter(|p| p.grantee == acting.id || self.may_grant(&acting.id, p.subject))
            .collect()
    }
}
