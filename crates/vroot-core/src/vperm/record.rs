//! Inode identity override record and its fixed wire encoding

use crate::error::RpcError;

/// Encoded size of [`InodeSimu`]
pub const INODE_SIMU_SIZE: usize = 56;

bitflags::bitflags! {
    /// Which override fields of a record are in effect
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VpermFields: u32 {
        const UID      = 1 << 0;
        const GID      = 1 << 1;
        const MODE     = 1 << 2;
        const DEV_NODE = 1 << 3;
    }
}

/// Override record for one (device, inode) pair.
///
/// Fields whose flag is not in `active` carry no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InodeSimu {
    pub dev: u64,
    pub ino: u64,
    pub active: VpermFields,
    pub uid: u32,
    pub gid: u32,
    pub real_mode: u32,
    pub virt_mode: u32,
    pub suid_sgid: u32,
    pub devnode_type: u32,
    pub rdev: u64,
}

impl InodeSimu {
    /// An empty record for `(dev, ino)`
    pub fn new(dev: u64, ino: u64) -> Self {
        Self {
            dev,
            ino,
            ..Self::default()
        }
    }

    pub fn key(&self) -> (u64, u64) {
        (self.dev, self.ino)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn with_ids(mut self, uid: Option<u32>, gid: Option<u32>) -> Self {
        if let Some(uid) = uid {
            self.uid = uid;
            self.active |= VpermFields::UID;
        }
        if let Some(gid) = gid {
            self.gid = gid;
            self.active |= VpermFields::GID;
        }
        self
    }

    pub fn with_mode(mut self, real_mode: u32, virt_mode: u32, suid_sgid: u32) -> Self {
        self.real_mode = real_mode;
        self.virt_mode = virt_mode;
        self.suid_sgid = suid_sgid;
        self.active |= VpermFields::MODE;
        self
    }

    pub fn with_dev_node(mut self, devnode_type: u32, rdev: u64) -> Self {
        self.devnode_type = devnode_type;
        self.rdev = rdev;
        self.active |= VpermFields::DEV_NODE;
        self
    }

    /// Copy the fields active in `update` into this record
    pub fn merge(&mut self, update: &InodeSimu) {
        if update.active.contains(VpermFields::UID) {
            self.uid = update.uid;
        }
        if update.active.contains(VpermFields::GID) {
            self.gid = update.gid;
        }
        if update.active.contains(VpermFields::MODE) {
            self.real_mode = update.real_mode;
            self.virt_mode = update.virt_mode;
            self.suid_sgid = update.suid_sgid;
        }
        if update.active.contains(VpermFields::DEV_NODE) {
            self.devnode_type = update.devnode_type;
            self.rdev = update.rdev;
        }
        self.active |= update.active;
    }

    /// Drop the `fields` overrides and zero their values
    pub fn release(&mut self, fields: VpermFields) {
        if fields.contains(VpermFields::UID) {
            self.uid = 0;
        }
        if fields.contains(VpermFields::GID) {
            self.gid = 0;
        }
        if fields.contains(VpermFields::MODE) {
            self.real_mode = 0;
            self.virt_mode = 0;
            self.suid_sgid = 0;
        }
        if fields.contains(VpermFields::DEV_NODE) {
            self.devnode_type = 0;
            self.rdev = 0;
        }
        self.active.remove(fields);
    }

    pub fn encode(&self) -> [u8; INODE_SIMU_SIZE] {
        let mut buf = [0u8; INODE_SIMU_SIZE];
        buf[0..8].copy_from_slice(&self.dev.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ino.to_le_bytes());
        buf[16..20].copy_from_slice(&self.active.bits().to_le_bytes());
        buf[20..24].copy_from_slice(&self.uid.to_le_bytes());
        buf[24..28].copy_from_slice(&self.gid.to_le_bytes());
        buf[28..32].copy_from_slice(&self.real_mode.to_le_bytes());
        buf[32..36].copy_from_slice(&self.virt_mode.to_le_bytes());
        buf[36..40].copy_from_slice(&self.suid_sgid.to_le_bytes());
        buf[40..44].copy_from_slice(&self.devnode_type.to_le_bytes());
        // 44..48 padding
        buf[48..56].copy_from_slice(&self.rdev.to_le_bytes());
        buf
    }

    /// Decode a record; unknown field bits are an error
    pub fn decode(buf: &[u8]) -> Result<Self, RpcError> {
        if buf.len() < INODE_SIMU_SIZE {
            return Err(RpcError::Malformed(format!(
                "inode record needs {} bytes, got {}",
                INODE_SIMU_SIZE,
                buf.len()
            )));
        }
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let u32_at = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&buf[at..at + 4]);
            u32::from_le_bytes(raw)
        };
        let active_bits = u32_at(16);
        let active = VpermFields::from_bits(active_bits).ok_or_else(|| {
            RpcError::Malformed(format!("unknown vperm field bits {:#x}", active_bits))
        })?;
        Ok(Self {
            dev: u64_at(0),
            ino: u64_at(8),
            active,
            uid: u32_at(20),
            gid: u32_at(24),
            real_mode: u32_at(28),
            virt_mode: u32_at(32),
            suid_sgid: u32_at(36),
            devnode_type: u32_at(40),
            rdev: u64_at(48),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_layout() {
        let record = InodeSimu::new(0x0102, 0x0304)
            .with_ids(Some(1000), None)
            .with_dev_node(2, 0xabcd);
        let buf = record.encode();
        assert_eq!(&buf[0..2], &[0x02, 0x01]);
        assert_eq!(&buf[8..10], &[0x04, 0x03]);
        assert_eq!(buf[16], (VpermFields::UID | VpermFields::DEV_NODE).bits() as u8);
        assert_eq!(&buf[20..24], &1000u32.to_le_bytes());
        assert_eq!(&buf[44..48], &[0, 0, 0, 0]);
        assert_eq!(&buf[48..50], &[0xcd, 0xab]);
        assert_eq!(InodeSimu::decode(&buf).unwrap(), record);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(InodeSimu::decode(&[0u8; 10]).is_err());
        let mut buf = InodeSimu::new(1, 1).encode();
        buf[16] = 0x80;
        assert!(matches!(InodeSimu::decode(&buf), Err(RpcError::Malformed(_))));
    }

    #[test]
    fn test_merge_and_release() {
        let mut record = InodeSimu::new(1, 2).with_ids(Some(0), Some(0));
        record.merge(&InodeSimu::new(1, 2).with_mode(0o644, 0o4755, 0o4000));
        assert_eq!(
            record.active,
            VpermFields::UID | VpermFields::GID | VpermFields::MODE
        );
        assert_eq!(record.virt_mode, 0o4755);

        record.release(VpermFields::UID | VpermFields::GID);
        assert_eq!(record.active, VpermFields::MODE);
        assert_eq!(record.uid, 0);
        record.release(VpermFields::MODE);
        assert!(record.is_empty());
    }
}
