//! Message descriptors and scatter/gather flags

use bitflags::bitflags;

use crate::{
    addr::BlockRef,
    error::{HugelinkError, Result},
    layout::MessageSlot,
};

bitflags! {
    /// Control bits in the high byte of a message's flags.
    ///
    /// The low byte belongs to the application and is carried through
    /// untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u16 {
        /// Part of a multi-message group
        const SCATTER_GATHER = 1 << 15;
        /// Latency-critical traffic; ignored when classifying a group
        const URLLC = 1 << 11;
        /// Application marker for LTE traffic
        const LTE = 1 << 10;
        /// Opens a group
        const SYN = 1 << 9;
        /// Closes a group
        const FIN = 1 << 8;

        const _ = !0;
    }
}

impl MsgFlags {
    /// Bits interpreted by the transport
    pub const CONTROL_MASK: u16 = 0xFF00;

    /// First message of a group
    pub const FIRST: MsgFlags = MsgFlags::SCATTER_GATHER.union(MsgFlags::SYN);
    /// Interior message of a group
    pub const MIDDLE: MsgFlags = MsgFlags::SCATTER_GATHER;
    /// Last message of a group
    pub const LAST: MsgFlags = MsgFlags::SCATTER_GATHER.union(MsgFlags::FIN);

    /// Attach application data to the low byte
    pub fn with_app_bits(self, bits: u8) -> MsgFlags {
        MsgFlags::from_bits_retain((self.bits() & Self::CONTROL_MASK) | bits as u16)
    }

    /// Application data in the low byte
    pub fn app_bits(self) -> u8 {
        (self.bits() & !Self::CONTROL_MASK) as u8
    }

    /// Classify the message's place in a scatter/gather group
    pub fn group_role(self) -> Result<GroupRole> {
        let control = self.bits() & Self::CONTROL_MASK & !MsgFlags::URLLC.bits();
        let control = MsgFlags::from_bits_retain(control);

        if control.is_empty() {
            Ok(GroupRole::Standalone)
        } else if control.contains(MsgFlags::SYN) {
            Ok(GroupRole::First)
        } else if control.contains(MsgFlags::FIN) {
            Ok(GroupRole::Last)
        } else if control.contains(MsgFlags::SCATTER_GATHER) {
            Ok(GroupRole::Middle)
        } else {
            Err(HugelinkError::validation(format!(
                "unsupported flag combination {:#06x}",
                self.bits()
            )))
        }
    }
}

/// Where a message sits in a scatter/gather group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    Standalone,
    First,
    Middle,
    Last,
}

impl GroupRole {
    /// Whether putting this message delivers the staged batch
    pub fn flushes(self) -> bool {
        matches!(self, GroupRole::Standalone | GroupRole::Last)
    }

    /// Canonical flags for the role
    pub fn flags(self) -> MsgFlags {
        match self {
            GroupRole::Standalone => MsgFlags::empty(),
            GroupRole::First => MsgFlags::FIRST,
            GroupRole::Middle => MsgFlags::MIDDLE,
            GroupRole::Last => MsgFlags::LAST,
        }
    }
}

/// A received message: a reference to a block in the arena plus metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub block: BlockRef,
    pub size: u32,
    pub type_tag: u16,
    pub flags: MsgFlags,
}

impl Message {
    pub fn new(block: BlockRef, size: u32, type_tag: u16, flags: MsgFlags) -> Self {
        Self {
            block,
            size,
            type_tag,
            flags,
        }
    }

    pub fn group_role(&self) -> Result<GroupRole> {
        self.flags.group_role()
    }
}

impl From<MessageSlot> for Message {
    fn from(slot: MessageSlot) -> Self {
        Self {
            block: BlockRef::from_raw(slot.physical_ref),
            size: slot.size,
            type_tag: slot.type_tag,
            flags: MsgFlags::from_bits_retain(slot.flags),
        }
    }
}

impl From<Message> for MessageSlot {
    fn from(message: Message) -> Self {
        Self {
            physical_ref: message.block.raw(),
            size: message.size,
            type_tag: message.type_tag,
            flags: message.flags.bits(),
        }
    }
}
