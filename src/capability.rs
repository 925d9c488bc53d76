use bitflags::bitflags;

bitflags! {
    /// Authority bits gating which call-ins and call-out surfaces a module may use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// Read access to the full game state (other players, shots, flags).
        const FULL_READ = 1 << 0;
        /// Authority over spawn/teleport/shot decisions.
        const GAME_CTRL = 1 << 1;
        /// Authority to consume keyboard and mouse events.
        const INPUT_CTRL = 1 << 2;
    }
}

impl Capabilities {
    pub fn label(self) -> String {
        let mut parts = Vec::new();
        if self.contains(Capabilities::FULL_READ) {
            parts.push("full-read");
        }
        if self.contains(Capabilities::GAME_CTRL) {
            parts.push("game-ctrl");
        }
        if self.contains(Capabilities::INPUT_CTRL) {
            parts.push("input-ctrl");
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join("+")
        }
    }
}

/// Permission bundle carried by each script host: capability bits plus the
/// VFS mode ceilings derived from the module's role. The allowed sets are a
/// hard ceiling supplied by the host; guest input can only narrow them.
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    pub caps: Capabilities,
    pub read_default: String,
    pub read_allowed: String,
    pub write_default: String,
    pub write_allowed: String,
}

impl CapabilityPolicy {
    pub fn new(
        caps: Capabilities,
        read_default: &str,
        read_allowed: &str,
        write_allowed: &str,
    ) -> Self {
        Self {
            caps,
            read_default: read_default.to_string(),
            read_allowed: read_allowed.to_string(),
            write_default: write_allowed.to_string(),
            write_allowed: write_allowed.to_string(),
        }
    }

    pub fn satisfies(&self, required: Capabilities) -> bool {
        self.caps.contains(required)
    }

    /// Settings keys starting with `_` are server-owned and never writable
    /// from guest code; everything else requires game-control authority.
    pub fn can_write_setting(&self, key: &str) -> bool {
        !key.starts_with('_') && self.caps.contains(Capabilities::GAME_CTRL)
    }

    /// Read modes for a guest-supplied path: an explicit `:modes:` prefix is
    /// resolved against the allowed ceiling, a bare path against the default.
    pub fn read_modes_for(&self, path: &str) -> &str {
        if path.starts_with(':') {
            &self.read_allowed
        } else {
            &self.read_default
        }
    }

    pub fn write_modes_for(&self, path: &str) -> &str {
        if path.starts_with(':') {
            &self.write_allowed
        } else {
            &self.write_default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superset_check_matches_contains() {
        let caps = Capabilities::FULL_READ | Capabilities::INPUT_CTRL;
        let policy = CapabilityPolicy::new(caps, "d", "d", "");
        assert!(policy.satisfies(Capabilities::FULL_READ));
        assert!(policy.satisfies(Capabilities::FULL_READ | Capabilities::INPUT_CTRL));
        assert!(!policy.satisfies(Capabilities::GAME_CTRL));
        assert!(policy.satisfies(Capabilities::empty()));
    }

    #[test]
    fn server_owned_settings_are_never_guest_writable() {
        let policy = CapabilityPolicy::new(Capabilities::GAME_CTRL, "d", "d", "");
        assert!(policy.can_write_setting("teamColor"));
        assert!(!policy.can_write_setting("_forbidUserScripts"));

        let no_ctrl = CapabilityPolicy::new(Capabilities::FULL_READ, "d", "d", "");
        assert!(!no_ctrl.can_write_setting("teamColor"));
    }

    #[test]
    fn explicit_prefix_selects_the_allowed_ceiling() {
        let policy = CapabilityPolicy {
            caps: Capabilities::empty(),
            read_default: "ud".to_string(),
            read_allowed: "udU".to_string(),
            write_default: "U".to_string(),
            write_allowed: "U".to_string(),
        };
        assert_eq!(policy.read_modes_for("maps/a.txt"), "ud");
        assert_eq!(policy.read_modes_for(":U:log.txt"), "udU");
    }

    #[test]
    fn capability_labels_read_well() {
        assert_eq!(Capabilities::empty().label(), "none");
        assert_eq!(
            (Capabilities::FULL_READ | Capabilities::GAME_CTRL).label(),
            "full-read+game-ctrl"
        );
    }
}
