//! Persisted `host-ACTION` descriptors.

use crate::action::ActionState;
use tracing::error;

const SEPARATOR: char = '-';

/// Who holds a job and doing what.
///
/// An empty hostname with the domain's starting state means nobody does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnameAction<T: ActionState> {
    /// Host holding the action.
    pub hostname: String,
    /// The action held.
    pub action: T,
}

impl<T: ActionState> HostnameAction<T> {
    /// A descriptor naming `hostname` as holder of `action`.
    pub fn new(hostname: &str, action: T) -> Self {
        Self {
            hostname: hostname.to_string(),
            action,
        }
    }

    /// The descriptor of a job nobody holds.
    pub fn none() -> Self {
        Self::new("", T::starting_state())
    }

    /// Whether this descriptor names a holder.
    pub fn is_held(&self) -> bool {
        !self.hostname.is_empty()
    }

    /// Encode as `<hostname>-<ACTION>`.
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.hostname, SEPARATOR, self.action.name())
    }

    /// Decode stored data, splitting on the last separator so hostnames may
    /// contain it.
    ///
    /// Data without a separator, with nothing after it, or naming an action
    /// outside the domain decodes to `(data, starting state)`.
    pub fn parse(data: &str) -> Self {
        let Some(index) = data.rfind(SEPARATOR).filter(|i| i + 1 < data.len()) else {
            error!(data, "invalid descriptor cannot be parsed");
            return Self::new(data, T::starting_state());
        };

        let (host, name) = (&data[..index], &data[index + 1..]);
        match T::from_name(name) {
            Some(action) => Self::new(host, action),
            None => {
                error!(data, domain = T::DOMAIN, "cannot parse action from descriptor");
                Self::new(data, T::starting_state())
            }
        }
    }
}
