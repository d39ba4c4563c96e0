use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Entries larger than this are treated as corruption rather than allocated.
const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

/// Encode one entry as `[u32 len][bincode][u32 crc32]`, little-endian.
fn encode_entry(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL entry too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Decoded {
    Entry(Event),
    /// Clean end of file.
    End,
    /// Torn or corrupt tail; everything from here on is discarded.
    Damaged(&'static str),
}

/// Read `buf.len()` bytes; `Ok(false)` on EOF before the buffer is full.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn decode_entry(reader: &mut impl Read) -> io::Result<Decoded> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(Decoded::End);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(Decoded::Damaged("implausible entry length"));
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(Decoded::Damaged("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(Decoded::Damaged("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Decoded::Damaged("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Decoded::Entry(event)),
        Err(_) => Ok(Decoded::Damaged("undecodable payload")),
    }
}

/// Append-only write-ahead log of reservation events, one file per tenant.
///
/// A crash can leave a torn final entry; replay stops at the first entry whose
/// length prefix or checksum does not hold.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync a single event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing; `flush_sync` commits the whole batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_entry(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a snapshot of the current state to the side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_entry(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact event in order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        loop {
            match decode_entry(&mut reader)? {
                Decoded::Entry(event) => events.push(event),
                Decoded::End => break,
                Decoded::Damaged(why) => {
                    tracing::warn!(
                        path = %path.display(),
                        kept = events.len(),
                        "discarding WAL tail: {why}"
                    );
                    break;
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staydesk_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn room_created(id: Ulid) -> Event {
        Event::RoomCreated {
            room: Room {
                id,
                hotel_id: Ulid::new(),
                owner_id: Ulid::new(),
                base_rate: dec!(180.50),
                capacity: 3,
                beds: 2,
                status: RoomStatus::Available,
            },
        }
    }

    fn stamp(d: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, d)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn reservation_created(room_id: Ulid, status: ReservationStatus) -> Event {
        Event::ReservationCreated {
            reservation: Reservation {
                id: Ulid::new(),
                code: "RES-0A1B2C3D".into(),
                room_id,
                hotel_id: Ulid::new(),
                guest_id: Ulid::new(),
                guest: GuestInfo {
                    name: "Luis".into(),
                    surname: "Huamán".into(),
                    document_id: "40981234".into(),
                    phone: "987654321".into(),
                },
                stay: Stay::nightly(
                    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
                ),
                guest_count: 2,
                pricing: PricingBreakdown {
                    units: dec!(3),
                    subtotal: dec!(541.50),
                    tax: dec!(97.50),
                    total: dec!(639),
                },
                status,
                notes: Some("late arrival".into()),
                cancel_reason: None,
                cancelled_at: None,
                created_at: stamp(1),
                updated_at: stamp(1),
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let rid = Ulid::new();
        let created = reservation_created(rid, ReservationStatus::Pending);
        let Event::ReservationCreated { reservation } = &created else {
            unreachable!()
        };
        let events = vec![
            room_created(rid),
            created.clone(),
            Event::ReservationCancelled {
                id: reservation.id,
                room_id: rid,
                at: stamp(2),
                reason: Some("duplicate booking".into()),
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_discarded() {
        let path = tmp_path("torn_tail.wal");
        let event = room_created(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            // length prefix promising 64 bytes, followed by only two
            f.write_all(&64u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn checksum_mismatch_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = room_created(Ulid::new());
        let bad = room_created(Ulid::new());
        {
            let mut f = File::create(&path).unwrap();
            encode_entry(&mut f, &good).unwrap();
            let payload = bincode::serialize(&bad).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
            encode_entry(&mut f, &room_created(Ulid::new())).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn implausible_length_is_corruption() {
        let path = tmp_path("huge_len.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compaction_shrinks_and_keeps_appending() {
        let path = tmp_path("compact.wal");
        let rid = Ulid::new();
        let snapshot = vec![
            room_created(rid),
            reservation_created(rid, ReservationStatus::Confirmed),
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&snapshot[0]).unwrap();
            for d in 1..20 {
                wal.append(&Event::ReservationConfirmed {
                    id: Ulid::new(),
                    room_id: rid,
                    at: stamp(d),
                })
                .unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 20);
            let before = fs::metadata(&path).unwrap().len();

            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);

            wal.append(&Event::ReservationCompleted {
                id: Ulid::new(),
                room_id: rid,
                at: stamp(25),
            })
            .unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(&replayed[..2], &snapshot[..]);
        assert!(matches!(replayed[2], Event::ReservationCompleted { .. }));
        assert!(!Wal::compact_tmp_path(&path).exists());
    }

    #[test]
    fn buffered_appends_visible_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|_| room_created(Ulid::new())).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}
