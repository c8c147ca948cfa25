//! Key layout inside the shared key-value store.
//!
//! Every key is `room:<kind>:<roomId>[:<qualifier>]`. Room ids are uuids, so
//! kinds never collide across rooms.

pub const ROOM_TTL: u64 = 1500; // 25 分鐘
pub const STATE_TTL: u64 = 1500;
pub const CHUNK_TTL: u64 = 30;

pub fn room(room_id: &str) -> String {
    format!("room:{room_id}")
}

pub fn participants(room_id: &str) -> String {
    format!("room:participants:{room_id}")
}

pub fn live_state(room_id: &str) -> String {
    format!("room:live:{room_id}")
}

pub fn live_chunk(room_id: &str, seq: u64) -> String {
    format!("room:chunk:{room_id}:{seq}")
}

pub fn audio_state(room_id: &str) -> String {
    format!("room:audio:{room_id}")
}

pub fn audio_data(room_id: &str, index: usize) -> String {
    format!("room:audio:data:{room_id}:{index}")
}

pub fn audio_meta(room_id: &str) -> String {
    format!("room:audio:data:{room_id}:meta")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct_per_room() {
        let a = "3f1c";
        let b = "9e0d";
        assert_ne!(live_chunk(a, 1), live_chunk(b, 1));
        assert_ne!(audio_state(a), audio_meta(a));
        assert_eq!(live_chunk(a, 7), "room:chunk:3f1c:7");
        assert_eq!(audio_meta(a), "room:audio:data:3f1c:meta");
    }
}
