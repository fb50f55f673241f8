//! Key matrix scanning.
//!
//! Rows are strobes driven low one at a time; columns are pulled-up sense
//! inputs. A pressed key pulls its column low while its row is strobed, so a
//! low reading sets the column's bit. Every pin goes through an
//! [`ExpanderPort`], and a row's strobe may live on any configured expander.

use embedded_hal::delay::DelayNs;

use crate::config::{Direction, Level, MatrixTopology, PinRef, MAX_ROWS};
use crate::debounce::Debouncer;
use crate::error::Error;
use crate::event::{EventSink, KeyEvent};
use crate::expander::ExpanderPort;

/// One row of key state, bit `c` = column `c` closed.
pub type RowBits = u32;

/// Mask covering the first `cols` columns.
pub const fn col_mask(cols: usize) -> RowBits {
    if cols >= RowBits::BITS as usize {
        RowBits::MAX
    } else {
        (1 << cols) - 1
    }
}

/// Drives the strobe/sense cycle for one topology.
pub struct Scanner {
    topology: MatrixTopology,
    /// Last pass, `None` where the row's bus traffic failed.
    raw: [Option<RowBits>; MAX_ROWS],
    /// A strobe whose park failed and may still be driving low.
    stuck: Option<PinRef>,
}

impl Scanner {
    pub const fn new(topology: MatrixTopology) -> Self {
        Self {
            topology,
            raw: [None; MAX_ROWS],
            stuck: None,
        }
    }

    pub fn topology(&self) -> &MatrixTopology {
        &self.topology
    }

    /// Strobes become outputs parked high, sense lines pulled-up inputs.
    pub fn init<P: ExpanderPort + ?Sized>(&self, port: &mut P) -> Result<(), Error> {
        for &strobe in self.topology.rows {
            port.configure(strobe, Direction::Output)?;
            port.write(strobe, Level::High)?;
        }
        for &sense in self.topology.cols {
            port.configure(sense, Direction::Input { pull_up: true })?;
        }
        Ok(())
    }

    /// One pass over every row, strictly in order. Bus errors leave that
    /// row's sample empty and scanning moves on; returns how many rows failed.
    ///
    /// A strobe that could not be parked high keeps driving. Until a later
    /// write to its port repairs it, rows whose strobe sits on another port
    /// are skipped, since their keys would read through the stuck row. The
    /// next pass starts by parking it again.
    pub fn scan<P, D>(&mut self, port: &mut P, delay: &mut D, settle_us: u32) -> Result<usize, Error>
    where
        P: ExpanderPort + ?Sized,
        D: DelayNs + ?Sized,
    {
        if let Some(pin) = self.stuck {
            if port.write(pin, Level::High).is_ok() {
                self.stuck = None;
            }
        }

        let mut failed = 0;
        for row in 0..self.topology.row_count() {
            let logical = self.topology.row_offset as usize + row;
            let strobe = self.topology.rows[row];
            if let Some(pin) = self.stuck.filter(|pin| !pin.same_port(strobe)) {
                log::warn!("row {} skipped this cycle: strobe {} still driven", logical, pin);
                self.raw[row] = None;
                failed += 1;
                continue;
            }

            let (sample, parked) = self.scan_row(port, delay, settle_us, strobe);
            // Any write to the shared port, park or strobe, rewrites the
            // stuck pin from the shadow, so only this row's park matters now
            self.stuck = match parked {
                Ok(()) => None,
                Err(err) if err.is_bus() => Some(strobe),
                Err(err) => return Err(err),
            };

            self.raw[row] = match sample.and_then(|bits| parked.map(|()| bits)) {
                Ok(bits) => Some(bits),
                Err(err) if err.is_bus() => {
                    log::warn!("row {} skipped this cycle: {}", logical, err);
                    failed += 1;
                    None
                }
                Err(err) => return Err(err),
            };
        }
        Ok(failed)
    }

    /// Strobe, settle, sense, then park the strobe high again whatever
    /// happened, with one retry. Returns the sample and the park result.
    fn scan_row<P, D>(
        &self,
        port: &mut P,
        delay: &mut D,
        settle_us: u32,
        strobe: PinRef,
    ) -> (Result<RowBits, Error>, Result<(), Error>)
    where
        P: ExpanderPort + ?Sized,
        D: DelayNs + ?Sized,
    {
        let levels = port.write(strobe, Level::Low).and_then(|()| {
            delay.delay_us(settle_us);
            port.read_many(self.topology.cols)
        });

        let parked = port
            .write(strobe, Level::High)
            .or_else(|_| port.write(strobe, Level::High));

        // Active low: a closed key reads low
        let mask = col_mask(self.topology.col_count());
        (levels.map(|levels| !levels & mask), parked)
    }

    /// Samples from the last pass.
    pub fn raw(&self) -> &[Option<RowBits>] {
        &self.raw[..self.topology.row_count()]
    }
}

/// A scanner, its debouncer, and the state last handed to the dispatcher.
pub struct Matrix {
    scanner: Scanner,
    debouncer: Debouncer,
    reported: [RowBits; MAX_ROWS],
}

impl Matrix {
    pub const fn new(topology: MatrixTopology, debounce: u8) -> Self {
        Self {
            debouncer: Debouncer::new(topology.row_count(), topology.col_count(), debounce),
            scanner: Scanner::new(topology),
            reported: [0; MAX_ROWS],
        }
    }

    pub fn topology(&self) -> &MatrixTopology {
        self.scanner.topology()
    }

    pub fn init<P: ExpanderPort + ?Sized>(&self, port: &mut P) -> Result<(), Error> {
        self.scanner.init(port)
    }

    /// Scan every row and feed the debouncer. A row whose scan failed is
    /// left out of this cycle: its stable state and pending counts stay put.
    pub fn scan<P, D>(&mut self, port: &mut P, delay: &mut D, settle_us: u32) -> Result<usize, Error>
    where
        P: ExpanderPort + ?Sized,
        D: DelayNs + ?Sized,
    {
        let failed = self.scanner.scan(port, delay, settle_us)?;
        for (row, sample) in self.scanner.raw().iter().enumerate() {
            if let Some(raw) = *sample {
                self.debouncer.update_row(row, raw);
            }
        }
        Ok(failed)
    }

    /// Emit one event per key whose debounced state changed since the last
    /// dispatch, row-major then column order, all stamped with `time`.
    pub fn dispatch<S: EventSink + ?Sized>(&mut self, time: u32, sink: &mut S) -> usize {
        let offset = self.topology().row_offset;
        let mut emitted = 0;
        for (row, &stable) in self.debouncer.stable().iter().enumerate() {
            let changed = stable ^ self.reported[row];
            if changed == 0 {
                continue;
            }
            for col in 0..RowBits::BITS as usize {
                let bit = 1 << col;
                if changed & bit == 0 {
                    continue;
                }
                let event = KeyEvent {
                    row: offset + row as u8,
                    col: col as u8,
                    pressed: stable & bit != 0,
                    time,
                };
                log::trace!("{:?}", event);
                sink.accept(event);
                emitted += 1;
            }
            self.reported[row] = stable;
        }
        emitted
    }

    /// Debounced state of a local key.
    pub fn is_pressed(&self, row: usize, col: usize) -> bool {
        col < RowBits::BITS as usize && self.debouncer.stable_row(row) & (1 << col) != 0
    }

    pub fn raw(&self) -> &[Option<RowBits>] {
        self.scanner.raw()
    }
}

#[cfg(test)]
mod tests {
    use heapless::Vec;

    use super::*;
    use crate::config::{ExpanderAddress, PinRef};
    use crate::expander::Mcp23017;
    use crate::sim::{NoopDelay, SimBus};

    const ROWS: &[PinRef] = &[PinRef::b(0x20, 0), PinRef::b(0x20, 1), PinRef::b(0x20, 2)];
    const COLS: &[PinRef] = &[PinRef::a(0x20, 0), PinRef::a(0x20, 1)];
    const TOPOLOGY: MatrixTopology = MatrixTopology {
        rows: ROWS,
        cols: COLS,
        row_offset: 0,
    };

    fn port() -> Mcp23017<SimBus> {
        let mut bus = SimBus::new();
        bus.attach(ExpanderAddress::new(0x20));
        Mcp23017::new(bus)
    }

    #[test]
    fn test_col_mask() {
        assert_eq!(col_mask(0), 0);
        assert_eq!(col_mask(5), 0b11111);
        assert_eq!(col_mask(32), u32::MAX);
    }

    #[test]
    fn test_init_parks_strobes_high() {
        let mut port = port();
        Scanner::new(TOPOLOGY).init(&mut port).unwrap();
        for &strobe in ROWS {
            assert_eq!(port.direction(strobe), Some(Direction::Output));
            assert_eq!(port.bus().level(strobe), Some(true));
        }
        for &sense in COLS {
            assert_eq!(
                port.direction(sense),
                Some(Direction::Input { pull_up: true })
            );
        }
    }

    #[test]
    fn test_scan_sets_bits_for_closed_keys() {
        let mut port = port();
        let mut scanner = Scanner::new(TOPOLOGY);
        scanner.init(&mut port).unwrap();
        port.bus_mut().press(ROWS[1], COLS[1]);
        port.bus_mut().press(ROWS[2], COLS[0]);

        assert_eq!(scanner.scan(&mut port, &mut NoopDelay, 0), Ok(0));
        assert_eq!(scanner.raw(), &[Some(0b00), Some(0b10), Some(0b01)]);
        // Nothing left strobed
        for &strobe in ROWS {
            assert_eq!(port.bus().level(strobe), Some(true));
        }
    }

    #[test]
    fn test_bus_error_skips_only_that_row() {
        let mut port = port();
        let mut scanner = Scanner::new(TOPOLOGY);
        scanner.init(&mut port).unwrap();
        port.bus_mut().press(ROWS[0], COLS[0]);
        port.bus_mut().press(ROWS[2], COLS[1]);

        // Each row is strobe write, sense read, park write; fail row 1's read
        port.bus_mut().fail_after(ExpanderAddress::new(0x20), 4, 1);
        assert_eq!(scanner.scan(&mut port, &mut NoopDelay, 0), Ok(1));
        assert_eq!(scanner.raw(), &[Some(0b01), None, Some(0b10)]);
        assert_eq!(port.bus().level(ROWS[1]), Some(true));
    }

    #[test]
    fn test_scan_without_init_is_a_pin_state_error() {
        let mut port = port();
        let mut scanner = Scanner::new(TOPOLOGY);
        assert!(matches!(
            scanner.scan(&mut port, &mut NoopDelay, 0),
            Err(Error::InvalidPinState { .. })
        ));
    }

    #[test]
    fn test_failed_row_keeps_debounce_progress() {
        let mut port = port();
        let mut matrix = Matrix::new(TOPOLOGY, 3);
        matrix.init(&mut port).unwrap();
        port.bus_mut().press(ROWS[0], COLS[0]);

        matrix.scan(&mut port, &mut NoopDelay, 0).unwrap();
        matrix.scan(&mut port, &mut NoopDelay, 0).unwrap();
        // Row 0's strobe write fails: the cycle is left out, not counted
        port.bus_mut().fail_next(ExpanderAddress::new(0x20), 1);
        assert_eq!(matrix.scan(&mut port, &mut NoopDelay, 0), Ok(1));
        assert!(!matrix.is_pressed(0, 0));

        matrix.scan(&mut port, &mut NoopDelay, 0).unwrap();
        assert!(matrix.is_pressed(0, 0));
    }

    #[test]
    fn test_key_registers_despite_periodic_faults() {
        const ONE: MatrixTopology = MatrixTopology {
            rows: &[PinRef::b(0x20, 0)],
            cols: &[PinRef::a(0x20, 0)],
            row_offset: 0,
        };
        let mut port = port();
        let mut matrix = Matrix::new(ONE, 5);
        matrix.init(&mut port).unwrap();
        port.bus_mut().press(ONE.rows[0], ONE.cols[0]);

        let mut events: Vec<KeyEvent, 8> = Vec::new();
        for cycle in 1..=20u32 {
            if cycle % 5 == 0 {
                port.bus_mut().fail_next(ExpanderAddress::new(0x20), 3);
            }
            matrix.scan(&mut port, &mut NoopDelay, 0).unwrap();
            matrix.dispatch(cycle, &mut events);
        }
        // Four good samples, a faulted cycle, then the fifth good one
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, 6);
        assert!(events[0].pressed);
    }

    #[test]
    fn test_stuck_strobe_blocks_rows_on_other_ports() {
        const ROWS: &[PinRef] = &[PinRef::b(0x20, 0), PinRef::b(0x21, 0), PinRef::b(0x20, 1)];
        const SPLIT: MatrixTopology = MatrixTopology {
            rows: ROWS,
            cols: COLS,
            row_offset: 0,
        };
        let mut port = port();
        port.bus_mut().attach(ExpanderAddress::new(0x21));
        let mut scanner = Scanner::new(SPLIT);
        scanner.init(&mut port).unwrap();
        port.bus_mut().press(ROWS[0], COLS[0]);
        port.bus_mut().press(ROWS[1], COLS[1]);

        // Row 0 reads fine, then both park attempts fail
        port.bus_mut().fail_after(ExpanderAddress::new(0x20), 2, 2);
        let other = port.bus().chip(ExpanderAddress::new(0x21)).unwrap().transactions();
        assert_eq!(scanner.scan(&mut port, &mut NoopDelay, 0), Ok(2));
        // Row 1 lives on another chip and is skipped, or row 0's key would
        // show up on it. Row 2's strobe write shares row 0's port and
        // releases it, so column 0 reads open there.
        assert_eq!(scanner.raw(), &[None, None, Some(0b00)]);
        assert_eq!(
            port.bus().chip(ExpanderAddress::new(0x21)).unwrap().transactions(),
            other
        );
        assert_eq!(port.bus().level(ROWS[0]), Some(true));

        assert_eq!(scanner.scan(&mut port, &mut NoopDelay, 0), Ok(0));
        assert_eq!(scanner.raw(), &[Some(0b01), Some(0b10), Some(0b00)]);
    }

    #[test]
    fn test_stuck_strobe_is_parked_on_next_pass() {
        const ROWS: &[PinRef] = &[PinRef::b(0x21, 0), PinRef::b(0x20, 0)];
        const SPLIT: MatrixTopology = MatrixTopology {
            rows: ROWS,
            cols: COLS,
            row_offset: 0,
        };
        let mut port = port();
        port.bus_mut().attach(ExpanderAddress::new(0x21));
        let mut scanner = Scanner::new(SPLIT);
        scanner.init(&mut port).unwrap();
        port.bus_mut().press(ROWS[0], COLS[0]);

        // Strobe write goes through, both parks fail
        port.bus_mut().fail_after(ExpanderAddress::new(0x21), 1, 2);
        assert_eq!(scanner.scan(&mut port, &mut NoopDelay, 0), Ok(2));
        assert_eq!(port.bus().level(ROWS[0]), Some(false));

        assert_eq!(scanner.scan(&mut port, &mut NoopDelay, 0), Ok(0));
        assert_eq!(scanner.raw(), &[Some(0b01), Some(0b00)]);
    }

    #[test]
    fn test_dispatch_reports_each_change_once() {
        let mut port = port();
        let mut matrix = Matrix::new(TOPOLOGY, 1);
        matrix.init(&mut port).unwrap();
        port.bus_mut().press(ROWS[2], COLS[1]);
        port.bus_mut().press(ROWS[0], COLS[1]);
        port.bus_mut().press(ROWS[0], COLS[0]);

        let mut events: Vec<KeyEvent, 8> = Vec::new();
        matrix.scan(&mut port, &mut NoopDelay, 0).unwrap();
        assert_eq!(matrix.dispatch(7, &mut events), 3);
        let order: Vec<(u8, u8), 8> = events.iter().map(|e| (e.row, e.col)).collect();
        assert_eq!(&order[..], &[(0, 0), (0, 1), (2, 1)]);
        assert!(events.iter().all(|e| e.pressed && e.time == 7));

        events.clear();
        matrix.scan(&mut port, &mut NoopDelay, 0).unwrap();
        assert_eq!(matrix.dispatch(8, &mut events), 0);

        port.bus_mut().release(ROWS[0], COLS[1]);
        matrix.scan(&mut port, &mut NoopDelay, 0).unwrap();
        matrix.dispatch(9, &mut events);
        assert_eq!(
            &events[..],
            &[KeyEvent {
                row: 0,
                col: 1,
                pressed: false,
                time: 9
            }]
        );
    }
}
