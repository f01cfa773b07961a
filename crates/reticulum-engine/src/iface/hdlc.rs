use crate::buffer::OutputBuffer;
use crate::error::RnsError;

const HDLC_FRAME_FLAG: u8 = 0x7e;
const HDLC_ESCAPE_BYTE: u8 = 0x7d;
const HDLC_ESCAPE_MASK: u8 = 0b00100000;

pub struct Hdlc {}

impl Hdlc {
    pub fn encode(data: &[u8], buffer: &mut OutputBuffer) -> Result<usize, RnsError> {
        buffer.write_byte(HDLC_FRAME_FLAG)?;

        for &byte in data {
            match byte {
                HDLC_FRAME_FLAG | HDLC_ESCAPE_BYTE => {
                    buffer.write(&[HDLC_ESCAPE_BYTE, byte ^ HDLC_ESCAPE_MASK])?;
                }
                _ => {
                    buffer.write_byte(byte)?;
                }
            }
        }

        buffer.write_byte(HDLC_FRAME_FLAG)?;

        Ok(buffer.offset())
    }

    /// Returns start and end index of an HDLC frame within `data`, if a complete one is present.
    pub fn find(data: &[u8]) -> Option<(usize, usize)> {
        let mut start = false;
        let mut end = false;

        let mut start_index: usize = 0;
        let mut end_index: usize = 0;

        for (i, &byte) in data.iter().enumerate() {
            if byte != HDLC_FRAME_FLAG {
                continue;
            }

            if !start {
                start_index = i;
                start = true;
            } else if !end {
                end_index = i;
                end = true;
            }

            if start && end {
                return Some((start_index, end_index));
            }
        }

        None
    }

    pub fn decode(data: &[u8], output: &mut OutputBuffer) -> Result<usize, RnsError> {
        let mut started = false;
        let mut finished = false;
        let mut escape = false;

        for &byte in data {
            if escape {
                escape = false;
                output.write_byte(byte ^ HDLC_ESCAPE_MASK)?;
            } else {
                match byte {
                    HDLC_FRAME_FLAG => {
                        if started {
                            finished = true;
                            break;
                        }

                        started = true;
                    }
                    HDLC_ESCAPE_BYTE => {
                        escape = true;
                    }
                    _ => {
                        output.write_byte(byte)?;
                    }
                }
            }
        }

        if !finished {
            return Err(RnsError::OutOfMemory);
        }

        Ok(output.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame_with_flag_and_escape_bytes() {
        let data = [0x01u8, HDLC_FRAME_FLAG, 0x02, HDLC_ESCAPE_BYTE, 0x03];

        let mut encode_storage = [0u8; 32];
        let mut encode_buf = OutputBuffer::new(&mut encode_storage);
        let encoded_len = Hdlc::encode(&data, &mut encode_buf).unwrap();
        let encoded = &encode_storage[..encoded_len];

        assert_eq!(encoded[0], HDLC_FRAME_FLAG);
        assert_eq!(*encoded.last().unwrap(), HDLC_FRAME_FLAG);

        let mut decode_storage = [0u8; 32];
        let mut decode_buf = OutputBuffer::new(&mut decode_storage);
        let decoded_len = Hdlc::decode(encoded, &mut decode_buf).unwrap();
        assert_eq!(&decode_storage[..decoded_len], &data[..]);
    }

    #[test]
    fn find_locates_frame_boundaries() {
        let data = [0xffu8, HDLC_FRAME_FLAG, 0x01, 0x02, HDLC_FRAME_FLAG, 0xff];
        assert_eq!(Hdlc::find(&data), Some((1, 4)));
    }

    #[test]
    fn decode_without_closing_flag_is_an_error() {
        let data = [HDLC_FRAME_FLAG, 0x01, 0x02];
        let mut storage = [0u8; 32];
        let mut buf = OutputBuffer::new(&mut storage);
        assert!(Hdlc::decode(&data, &mut buf).is_err());
    }
}
