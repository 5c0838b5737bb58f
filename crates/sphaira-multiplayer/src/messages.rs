//! Game message kinds and their payloads.
//!
//! | kind         | payload                                              | delivery          |
//! |--------------|------------------------------------------------------|-------------------|
//! | `WorldInfo`  | request: empty; reply: [`WorldInfo`]                  | ordered, ch. 0    |
//! | `PlayerInfo` | [`Roster`]                                            | ordered, ch. 0    |
//! | `PlayerPos`  | client → server: [`PositionUpdate`]; relay: [`PositionRelay`] | sequenced, ch. 1 |

use glam::Vec3;
use sphaira_net::{Delivery, MessageKind, PayloadError, PayloadReader, PayloadWriter, WirePayload};

/// World bootstrap request and reply.
pub const WORLD_INFO: MessageKind = MessageKind::new("WorldInfo", Delivery::ordered(0));

/// Roster of connected session ids.
pub const PLAYER_INFO: MessageKind = MessageKind::new("PlayerInfo", Delivery::ordered(0));

/// Position updates and their relay.
pub const PLAYER_POS: MessageKind = MessageKind::new("PlayerPos", Delivery::sequenced(1));

/// Bootstrap reply: everything a client needs to build the shared world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldInfo {
    /// Sky seed.
    pub seed: i32,
    /// World sphere radius.
    pub radius: f32,
    /// World density.
    pub density: f32,
    /// Server elapsed seconds when the reply was written.
    pub server_elapsed: f64,
    /// Session id assigned to the requester.
    pub assigned_id: u16,
}

impl WirePayload for WorldInfo {
    fn write(&self, writer: &mut PayloadWriter) {
        writer
            .write_i32(self.seed)
            .write_f32(self.radius)
            .write_f32(self.density)
            .write_f64(self.server_elapsed)
            .write_u16(self.assigned_id);
    }

    fn read(reader: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            seed: reader.read_i32()?,
            radius: reader.read_f32()?,
            density: reader.read_f32()?,
            server_elapsed: reader.read_f64()?,
            assigned_id: reader.read_u16()?,
        })
    }
}

/// Ids of every connected session. Order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    /// Session ids.
    pub ids: Vec<u16>,
}

impl WirePayload for Roster {
    fn write(&self, writer: &mut PayloadWriter) {
        writer.write_u16(self.ids.len() as u16);
        for id in &self.ids {
            writer.write_u16(*id);
        }
    }

    fn read(reader: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        let count = usize::from(reader.read_u16()?);
        let ids = (0..count)
            .map(|_| reader.read_u16())
            .collect::<Result<_, _>>()?;
        Ok(Self { ids })
    }
}

fn write_vec3(writer: &mut PayloadWriter, v: Vec3) {
    writer.write_f32(v.x).write_f32(v.y).write_f32(v.z);
}

fn read_vec3(reader: &mut PayloadReader<'_>) -> Result<Vec3, PayloadError> {
    Ok(Vec3::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?))
}

/// A client's own position, sent to the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    /// World-space position.
    pub position: Vec3,
}

impl WirePayload for PositionUpdate {
    fn write(&self, writer: &mut PayloadWriter) {
        write_vec3(writer, self.position);
    }

    fn read(reader: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            position: read_vec3(reader)?,
        })
    }
}

/// Another session's position, relayed by the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRelay {
    /// Session the position belongs to.
    pub id: u16,
    /// World-space position.
    pub position: Vec3,
}

impl WirePayload for PositionRelay {
    fn write(&self, writer: &mut PayloadWriter) {
        writer.write_u16(self.id);
        write_vec3(writer, self.position);
    }

    fn read(reader: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            id: reader.read_u16()?,
            position: read_vec3(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_info_layout() {
        let info = WorldInfo {
            seed: -7,
            radius: 8.0,
            density: 1024.0,
            server_elapsed: 2.5,
            assigned_id: 3,
        };
        let bytes = info.to_bytes();
        assert_eq!(bytes.len(), 4 + 4 + 4 + 8 + 2);
        assert_eq!(&bytes[..4], &(-7i32).to_le_bytes());
        assert_eq!(&bytes[20..], &[3, 0]);
        assert_eq!(WorldInfo::read(&mut PayloadReader::new(&bytes)).unwrap(), info);
    }

    #[test]
    fn test_roster_layout() {
        let bytes = Roster { ids: vec![0, 2] }.to_bytes();
        assert_eq!(bytes, vec![2, 0, 0, 0, 2, 0]);
    }

    #[test]
    fn test_relay_prepends_id() {
        let position = Vec3::new(1.0, 2.0, 3.0);
        let update = PositionUpdate { position }.to_bytes();
        let relay = PositionRelay { id: 4, position }.to_bytes();
        assert_eq!(&relay[..2], &[4, 0]);
        assert_eq!(&relay[2..], &update[..]);
    }

    #[test]
    fn test_truncated_roster_rejected() {
        let bytes = [3, 0, 1, 0];
        assert!(Roster::read(&mut PayloadReader::new(&bytes)).is_err());
    }

    #[test]
    fn test_kinds_use_expected_channels() {
        assert_eq!(WORLD_INFO.delivery, Delivery::ordered(0));
        assert_eq!(PLAYER_INFO.delivery, Delivery::ordered(0));
        assert_eq!(PLAYER_POS.delivery, Delivery::sequenced(1));
    }
}
