use std::collections::{HashMap, HashSet};

use crate::capability::Capabilities;
use crate::supervisor::ModuleKind;

/// How listener return values are consumed when a call-in is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopType {
    /// Every listener runs; return values are ignored.
    Basic,
    /// Stop at the first listener returning truthy.
    FirstTrue,
    /// Every listener runs; a "taken" flag accumulates truthy returns and is
    /// passed to subsequent listeners as the leading argument.
    TakenContinue,
    /// Stop at the first listener returning a non-empty string.
    FirstString,
    /// Call-in-specific handling (word completion collects string arrays).
    Special,
}

macro_rules! call_in_enum {
    ($($variant:ident),* $(,)?) => {
        /// Dense call-in codes. Variant order fixes the numeric code; strings
        /// appear only at the registry boundary.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum CallIn {
            $($variant),*
        }

        impl CallIn {
            pub const ALL: &'static [CallIn] = &[$(CallIn::$variant),*];

            pub fn code(self) -> u16 {
                self as u16
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(CallIn::$variant => stringify!($variant)),*
                }
            }
        }
    };
}

call_in_enum! {
    Shutdown,
    Update,
    SettingChange,
    CommandFallback,
    RecvCommand,
    RecvChatMsg,
    RecvScriptData,
    ServerJoined,
    ServerParted,
    PlayerAdded,
    PlayerRemoved,
    PlayerSpawned,
    PlayerKilled,
    PlayerJumped,
    PlayerTeamChange,
    PlayerScoreChange,
    ShotAdded,
    ShotRemoved,
    ShotRicochet,
    ShotTeleported,
    FlagAdded,
    FlagRemoved,
    FlagGrabbed,
    FlagDropped,
    FlagCaptured,
    FlagTransferred,
    GLResize,
    GLReload,
    GLContextFree,
    GLUnmapped,
    DrawGenesis,
    DrawWorldStart,
    DrawWorld,
    DrawWorldAlpha,
    DrawScreenStart,
    DrawScreen,
    DrawRadar,
    KeyPress,
    KeyRelease,
    UnicodeText,
    MousePress,
    MouseMove,
    MouseRelease,
    MouseWheel,
    IsAbove,
    GetTooltip,
    WordComplete,
    ForbidSpawn,
    ForbidJump,
    ForbidFlagDrop,
    ForbidShot,
    ForbidShotLock,
    ForbidShotHit,
}

/// The one call-in whose public name differs from the event that fires it:
/// guests register `GLReload`, the renderer reports `GLContextInit`.
pub const ALIAS_CALL_IN_NAME: &str = "GLReload";
pub const ALIAS_EVENT_NAME: &str = "GLContextInit";

#[derive(Debug, Clone)]
pub struct CallInInfo {
    pub call_in: CallIn,
    pub name: &'static str,
    pub required: Capabilities,
    pub loop_type: LoopType,
    pub single_module: Option<ModuleKind>,
    pub reversed: bool,
    pub reentrant: bool,
    pub is_draw: bool,
}

impl CallInInfo {
    fn basic(call_in: CallIn) -> Self {
        Self {
            call_in,
            name: call_in.name(),
            required: Capabilities::empty(),
            loop_type: LoopType::Basic,
            single_module: None,
            reversed: false,
            reentrant: false,
            is_draw: false,
        }
    }

    pub fn code(&self) -> u16 {
        self.call_in.code()
    }
}

fn info_for(call_in: CallIn) -> CallInInfo {
    use CallIn::*;
    let mut info = CallInInfo::basic(call_in);
    match call_in {
        Shutdown | Update | ServerJoined | ServerParted => {}
        SettingChange => info.reentrant = true,
        CommandFallback => {
            info.loop_type = LoopType::FirstTrue;
            info.single_module = Some(ModuleKind::User);
        }
        RecvCommand | RecvChatMsg => info.loop_type = LoopType::FirstTrue,
        RecvScriptData => info.required = Capabilities::FULL_READ,
        PlayerAdded | PlayerRemoved | PlayerSpawned | PlayerKilled | PlayerJumped
        | PlayerTeamChange | PlayerScoreChange => info.required = Capabilities::FULL_READ,
        ShotAdded | ShotRemoved | ShotRicochet | ShotTeleported => {
            info.required = Capabilities::FULL_READ;
        }
        FlagAdded | FlagRemoved | FlagGrabbed | FlagDropped | FlagCaptured | FlagTransferred => {
            info.required = Capabilities::FULL_READ;
        }
        GLResize | GLReload | GLContextFree | GLUnmapped => {}
        DrawGenesis | DrawWorldStart | DrawWorld | DrawWorldAlpha | DrawScreenStart
        | DrawScreen | DrawRadar => {
            info.reversed = true;
            info.is_draw = true;
        }
        KeyPress | KeyRelease | UnicodeText | MousePress | MouseMove | MouseRelease
        | MouseWheel => {
            info.loop_type = LoopType::TakenContinue;
            info.required = Capabilities::INPUT_CTRL;
        }
        IsAbove => {
            info.loop_type = LoopType::FirstTrue;
            info.required = Capabilities::INPUT_CTRL;
        }
        GetTooltip => {
            info.loop_type = LoopType::FirstString;
            info.required = Capabilities::INPUT_CTRL;
        }
        WordComplete => {
            info.loop_type = LoopType::Special;
            info.required = Capabilities::INPUT_CTRL;
        }
        ForbidSpawn | ForbidJump | ForbidFlagDrop | ForbidShot | ForbidShotLock
        | ForbidShotHit => {
            info.loop_type = LoopType::FirstTrue;
            info.required = Capabilities::GAME_CTRL;
        }
    }
    info
}

/// Static name ⇄ code table with per-call-in metadata. Built once at start-up
/// and read-only afterwards; duplicate wiring is a programmer error caught by
/// debug assertions, not a runtime condition.
pub struct CallInRegistry {
    infos: Vec<CallInInfo>,
    by_name: HashMap<&'static str, CallIn>,
}

impl CallInRegistry {
    pub fn new() -> Self {
        let mut infos = Vec::with_capacity(CallIn::ALL.len());
        let mut by_name = HashMap::with_capacity(CallIn::ALL.len());
        for &call_in in CallIn::ALL {
            let info = info_for(call_in);
            debug_assert_eq!(
                info.code() as usize,
                infos.len(),
                "call-in codes must stay dense"
            );
            let previous = by_name.insert(info.name, call_in);
            debug_assert!(previous.is_none(), "duplicate call-in name {}", info.name);
            infos.push(info);
        }
        Self { infos, by_name }
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn code_for(&self, name: &str) -> Option<CallIn> {
        self.by_name.get(name).copied()
    }

    pub fn name_for(&self, code: u16) -> Option<&'static str> {
        self.infos.get(code as usize).map(|info| info.name)
    }

    pub fn info(&self, call_in: CallIn) -> &CallInInfo {
        &self.infos[call_in.code() as usize]
    }

    pub fn infos(&self) -> &[CallInInfo] {
        &self.infos
    }

    /// The internal event name that fires a given call-in.
    pub fn event_name_for<'a>(&self, call_in_name: &'a str) -> &'a str {
        if call_in_name == ALIAS_CALL_IN_NAME {
            ALIAS_EVENT_NAME
        } else {
            call_in_name
        }
    }

    /// The public call-in name for a given internal event name.
    pub fn call_in_name_for<'a>(&self, event_name: &'a str) -> &'a str {
        if event_name == ALIAS_EVENT_NAME {
            ALIAS_CALL_IN_NAME
        } else {
            event_name
        }
    }

    pub fn call_in_for_event(&self, event_name: &str) -> Option<CallIn> {
        self.code_for(self.call_in_name_for(event_name))
    }

    /// The set of call-ins a module with the given capabilities may register:
    /// capabilities must cover the requirement and any exclusive-owner
    /// restriction must name this module.
    pub fn valid_for(&self, kind: ModuleKind, caps: Capabilities) -> HashSet<CallIn> {
        self.infos
            .iter()
            .filter(|info| caps.contains(info.required))
            .filter(|info| info.single_module.map_or(true, |owner| owner == kind))
            .map(|info| info.call_in)
            .collect()
    }
}

impl Default for CallInRegistry {
    fn default() -> Self {
        Self::new()
    }
}
