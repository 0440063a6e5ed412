//! CPIO writer, odc (portable ASCII) flavor.
//!
//! Every header field is ASCII octal: magic `070707`, then
//! dev/ino/mode/uid/gid/nlink/rdev at width 6, mtime at width 11,
//! namesize at width 6 (counting the terminating NUL), filesize at
//! width 11. The archive ends with a `TRAILER!!!` record of size zero
//! and nlink 1.

pub const ODC_MAGIC: &str = "070707";
pub const ODC_TRAILER: &str = "TRAILER!!!";

/// One archive member. Numeric fields wider than their octal field are
/// truncated to the low bits, as the format demands.
#[derive(Debug, Clone, Default)]
pub struct OdcRecord<'a> {
    pub name: &'a str,
    pub dev: u32,
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub rdev: u32,
    pub mtime: u64,
    pub data: &'a [u8],
}

impl<'a> OdcRecord<'a> {
    pub fn encode(&self) -> Vec<u8> {
        let name_bytes = self.name.as_bytes();
        let mut out =
            Vec::with_capacity(76 + name_bytes.len() + 1 + self.data.len());

        out.extend_from_slice(ODC_MAGIC.as_bytes());
        push_octal(&mut out, self.dev as u64, 6);
        push_octal(&mut out, self.ino as u64, 6);
        push_octal(&mut out, self.mode as u64, 6);
        push_octal(&mut out, self.uid as u64, 6);
        push_octal(&mut out, self.gid as u64, 6);
        push_octal(&mut out, self.nlink as u64, 6);
        push_octal(&mut out, self.rdev as u64, 6);
        push_octal(&mut out, self.mtime, 11);
        push_octal(&mut out, (name_bytes.len() + 1) as u64, 6);
        push_octal(&mut out, self.data.len() as u64, 11);
        out.extend_from_slice(name_bytes);
        out.push(0);
        out.extend_from_slice(self.data);

        out
    }

    pub fn trailer() -> Vec<u8> {
        OdcRecord {
            name: ODC_TRAILER,
            nlink: 1,
            ..Default::default()
        }
        .encode()
    }
}

fn push_octal(out: &mut Vec<u8>, value: u64, width: u32) {
    // Keep the low `width` octal digits so the field never overflows
    let value = value % 8u64.pow(width);
    let mut field = [b'0'; 11];
    let mut v = value;
    let mut idx = width as usize;
    while v > 0 {
        idx -= 1;
        field[idx] = b'0' + (v % 8) as u8;
        v /= 8;
    }
    out.extend_from_slice(&field[..width as usize]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let rec = OdcRecord {
            name: "Bootability/plist",
            dev: 0o12,
            ino: 0o7,
            mode: 0o100644,
            nlink: 1,
            mtime: 0o11203043675,
            data: &[0xDE, 0xAD],
            ..Default::default()
        };
        let bytes = rec.encode();

        assert_eq!(&bytes[0..6], b"070707");
        assert_eq!(&bytes[6..12], b"000012"); // dev
        assert_eq!(&bytes[12..18], b"000007"); // ino
        assert_eq!(&bytes[18..24], b"100644"); // mode
        assert_eq!(&bytes[24..30], b"000000"); // uid
        assert_eq!(&bytes[30..36], b"000000"); // gid
        assert_eq!(&bytes[36..42], b"000001"); // nlink
        assert_eq!(&bytes[42..48], b"000000"); // rdev
        assert_eq!(&bytes[48..59], b"11203043675"); // mtime
        assert_eq!(&bytes[59..65], b"000022"); // namesize: 17 chars + NUL
        assert_eq!(&bytes[65..76], b"00000000002"); // filesize
        assert_eq!(&bytes[76..93], b"Bootability/plist");
        assert_eq!(bytes[93], 0);
        assert_eq!(&bytes[94..], &[0xDE, 0xAD]);
    }

    #[test]
    fn fields_are_octal_digits() {
        let rec = OdcRecord {
            name: "f",
            mode: 0o777,
            nlink: 3,
            mtime: u64::MAX, // truncates, must still be octal
            data: &[1, 2, 3],
            ..Default::default()
        };
        let bytes = rec.encode();
        assert!(bytes[..76].iter().all(|&b| (b'0'..=b'7').contains(&b)));
    }

    #[test]
    fn trailer_record() {
        let bytes = OdcRecord::trailer();

        assert_eq!(&bytes[36..42], b"000001"); // nlink 1
        assert_eq!(&bytes[65..76], b"00000000000"); // zero size
        assert_eq!(&bytes[59..65], b"000013"); // "TRAILER!!!" + NUL = 11 = 0o13
        assert_eq!(&bytes[76..86], ODC_TRAILER.as_bytes());
        assert_eq!(bytes[86], 0);
        assert_eq!(bytes.len(), 87);
    }
}
