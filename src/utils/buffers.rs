use byteorder::{LittleEndian, ReadBytesExt};

/*
read functions for primitive data types on a u8 array, also increment the index
 */

pub fn read_u8(buffer: &[u8], index: &mut usize) -> u8 {
    let val = buffer[*index];
    *index += 1;
    val
}

pub fn read_i32(buffer: &[u8], index: &mut usize) -> i32 {
    let mut slice = &buffer[*index..*index + 4];
    *index += 4;
    slice.read_i32::<LittleEndian>().unwrap()
}

pub fn read_u32(buffer: &[u8], index: &mut usize) -> u32 {
    let mut slice = &buffer[*index..*index + 4];
    *index += 4;
    slice.read_u32::<LittleEndian>().unwrap()
}

pub fn read_f64(buffer: &[u8], index: &mut usize) -> f64 {
    let mut slice = &buffer[*index..*index + 8];
    *index += 8;
    slice.read_f64::<LittleEndian>().unwrap()
}

pub fn read_slice(buffer: &[u8], index: &mut usize, size: usize) -> Vec<u8> {
    let slice = &buffer[*index..*index + size];
    *index += size;
    slice.to_vec()
}

/*
append functions, little-endian like the read side
 */

pub fn append_u8(buffer: &mut Vec<u8>, val: u8) {
    buffer.push(val);
}

pub fn append_i32(buffer: &mut Vec<u8>, val: i32) {
    buffer.extend_from_slice(&val.to_le_bytes());
}

pub fn append_u32(buffer: &mut Vec<u8>, val: u32) {
    buffer.extend_from_slice(&val.to_le_bytes());
}

pub fn append_f64(buffer: &mut Vec<u8>, val: f64) {
    buffer.extend_from_slice(&val.to_le_bytes());
}

pub fn append_buffer(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_primitives() {
        let mut buf = Vec::new();
        append_u8(&mut buf, 0x2a);
        append_i32(&mut buf, -7);
        append_u32(&mut buf, 0xdead_beef);
        append_f64(&mut buf, 2.5);

        let mut index = 0;
        assert_eq!(read_u8(&buf, &mut index), 0x2a);
        assert_eq!(read_i32(&buf, &mut index), -7);
        assert_eq!(read_u32(&buf, &mut index), 0xdead_beef);
        assert_eq!(read_f64(&buf, &mut index), 2.5);
        assert_eq!(index, buf.len());
    }
}
