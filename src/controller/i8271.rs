//! Intel 8271 floppy disk controller
//!
//! Host register block: offset 0 is command (write) and status (read),
//! offset 1 is parameter (write) and result (read), offset 2 is the reset
//! register. Execution-phase data moves through a separate data register
//! reached by DMA acknowledge, or by the host directly in non-DMA mode.
//!
//! The controller addresses two drives, selected by command bits 6 and 7.
//! It keeps its own idea of the current track per surface and steps the
//! drive by the difference on every seek.

use crate::clock::Micros;
use crate::controller::{Effect, Effects, FdcTimer};
use crate::drive::{Drive, DriveFlags, DriveTable};
use crate::image::SectorInfo;
use log::{debug, trace, warn};
use std::fmt;

/// Delay before each execution-phase byte is requested
pub const DATA_REQUEST_DELAY_US: Micros = 64;
/// Delay between the last data byte and the completion interrupt
pub const COMPLETION_DELAY_US: Micros = 128;

/// Status: command in progress
pub const STATUS_BUSY: u8 = 0x80;
/// Status: command register full
pub const STATUS_COMMAND_FULL: u8 = 0x40;
/// Status: parameter register full
pub const STATUS_PARAMETER_FULL: u8 = 0x20;
/// Status: result register holds a result
pub const STATUS_RESULT_FULL: u8 = 0x10;
/// Status: interrupt request
pub const STATUS_INT_REQUEST: u8 = 0x08;
/// Status: data request in non-DMA mode
pub const STATUS_NON_DMA_REQUEST: u8 = 0x04;

const FLAG_DATA_REQUEST: u8 = 0x01;
const FLAG_DATA_DIRECTION: u8 = 0x02;

/// Result: good completion
pub const RESULT_GOOD: u8 = 0x00;
/// Result: CRC error in an ID field
pub const RESULT_ID_CRC_ERROR: u8 = 0x0C;
/// Result: CRC error in a data field
pub const RESULT_DATA_CRC_ERROR: u8 = 0x0E;
/// Result: drive not ready
pub const RESULT_NOT_READY: u8 = 0x10;
/// Result: media write protected
pub const RESULT_WRITE_PROTECTED: u8 = 0x12;
/// Result: track 0 sensor never seen while restoring
pub const RESULT_TRACK_0_NOT_FOUND: u8 = 0x14;
/// Result: no matching ID within one revolution
pub const RESULT_SECTOR_NOT_FOUND: u8 = 0x18;
/// Result: command not carried out
pub const RESULT_COMMAND_ERROR: u8 = 0x1A;
/// Result flag: a deleted data mark was found
pub const RESULT_DELETED_DATA: u8 = 0x20;

const RESULT_ERROR_MASK: u8 = 0x1E;

/// Special register: mode
pub const REG_MODE: u8 = 0x17;
/// Special register: surface 0 current track
pub const REG_SURFACE_0_CURRENT_TRACK: u8 = 0x12;
/// Special register: surface 1 current track
pub const REG_SURFACE_1_CURRENT_TRACK: u8 = 0x1A;
/// Special register: surface 0 bad track 1
pub const REG_SURFACE_0_BAD_TRACK_1: u8 = 0x10;
/// Special register: surface 0 bad track 2
pub const REG_SURFACE_0_BAD_TRACK_2: u8 = 0x11;
/// Special register: surface 1 bad track 1
pub const REG_SURFACE_1_BAD_TRACK_1: u8 = 0x18;
/// Special register: surface 1 bad track 2
pub const REG_SURFACE_1_BAD_TRACK_2: u8 = 0x19;
/// Special register: drive control output port
pub const REG_DRIVE_CONTROL_OUTPUT: u8 = 0x23;
/// Special register: drive control input port
pub const REG_DRIVE_CONTROL_INPUT: u8 = 0x22;

const SPECIFY_INITIALISE: u8 = 0x0D;
const SPECIFY_BAD_TRACKS_0: u8 = 0x10;
const SPECIFY_BAD_TRACKS_1: u8 = 0x18;

/// Drive control output bits
const DCO_WRITE_ENABLE: u8 = 0x01;
const DCO_STEP: u8 = 0x02;
const DCO_DIRECTION: u8 = 0x04;
const DCO_LOAD_HEAD: u8 = 0x08;
const DCO_SIDE: u8 = 0x20;
const DCO_SELECT: u8 = 0xC0;

const FORMAT_FILLER: u8 = 0xE5;
const MAX_RESTORE_STEPS: u32 = 255;
const MAX_PARAMETERS: usize = 5;

/// Completion type held in bits 4:3 of a result byte
/// (0 good, 1 recoverable, 2 operator intervention, 3 command/drive error)
pub fn completion_type(result: u8) -> u8 {
    (result >> 3) & 0x03
}

/// 8271 commands, decoded from the low six bits of the command register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Scan data (0x00)
    ScanData,
    /// Scan data and deleted data (0x04)
    ScanDataAndDeleted,
    /// Write data, 128-byte record (0x0A)
    WriteDataSingle,
    /// Write data, multiple records (0x0B)
    WriteDataMulti,
    /// Write deleted data, 128-byte record (0x0E)
    WriteDeletedDataSingle,
    /// Write deleted data, multiple records (0x0F)
    WriteDeletedDataMulti,
    /// Read data, single record (0x12)
    ReadDataSingle,
    /// Read data, multiple records (0x13)
    ReadDataMulti,
    /// Read data and deleted data, single record (0x16)
    ReadDataAndDeletedSingle,
    /// Read data and deleted data, multiple records (0x17)
    ReadDataAndDeletedMulti,
    /// Read ID fields (0x1B)
    ReadId,
    /// Verify data and deleted data, single record (0x1E)
    VerifySingle,
    /// Verify data and deleted data, multiple records (0x1F)
    VerifyMulti,
    /// Format a track (0x23)
    Format,
    /// Seek (0x29)
    Seek,
    /// Read drive status (0x2C)
    ReadDriveStatus,
    /// Specify (0x35)
    Specify,
    /// Write special register (0x3A)
    WriteSpecialRegister,
    /// Read special register (0x3D)
    ReadSpecialRegister,
}

impl Command {
    /// Decode a command register value
    pub fn from_opcode(value: u8) -> Option<Self> {
        let command = match value & 0x3F {
            0x00 => Command::ScanData,
            0x04 => Command::ScanDataAndDeleted,
            0x0A => Command::WriteDataSingle,
            0x0B => Command::WriteDataMulti,
            0x0E => Command::WriteDeletedDataSingle,
            0x0F => Command::WriteDeletedDataMulti,
            0x12 => Command::ReadDataSingle,
            0x13 => Command::ReadDataMulti,
            0x16 => Command::ReadDataAndDeletedSingle,
            0x17 => Command::ReadDataAndDeletedMulti,
            0x1B => Command::ReadId,
            0x1E => Command::VerifySingle,
            0x1F => Command::VerifyMulti,
            0x23 => Command::Format,
            0x29 => Command::Seek,
            0x2C => Command::ReadDriveStatus,
            0x35 => Command::Specify,
            0x3A => Command::WriteSpecialRegister,
            0x3D => Command::ReadSpecialRegister,
            _ => return None,
        };
        Some(command)
    }

    /// Low six bits of the command register
    pub fn opcode(self) -> u8 {
        match self {
            Command::ScanData => 0x00,
            Command::ScanDataAndDeleted => 0x04,
            Command::WriteDataSingle => 0x0A,
            Command::WriteDataMulti => 0x0B,
            Command::WriteDeletedDataSingle => 0x0E,
            Command::WriteDeletedDataMulti => 0x0F,
            Command::ReadDataSingle => 0x12,
            Command::ReadDataMulti => 0x13,
            Command::ReadDataAndDeletedSingle => 0x16,
            Command::ReadDataAndDeletedMulti => 0x17,
            Command::ReadId => 0x1B,
            Command::VerifySingle => 0x1E,
            Command::VerifyMulti => 0x1F,
            Command::Format => 0x23,
            Command::Seek => 0x29,
            Command::ReadDriveStatus => 0x2C,
            Command::Specify => 0x35,
            Command::WriteSpecialRegister => 0x3A,
            Command::ReadSpecialRegister => 0x3D,
        }
    }

    /// Parameter bytes the command waits for
    pub fn parameter_count(self) -> usize {
        match self {
            Command::ReadDriveStatus => 0,
            Command::Seek | Command::ReadSpecialRegister => 1,
            Command::WriteSpecialRegister
            | Command::ReadDataSingle
            | Command::ReadDataAndDeletedSingle
            | Command::WriteDataSingle
            | Command::WriteDeletedDataSingle
            | Command::VerifySingle => 2,
            Command::ReadId
            | Command::ReadDataMulti
            | Command::ReadDataAndDeletedMulti
            | Command::WriteDataMulti
            | Command::WriteDeletedDataMulti
            | Command::VerifyMulti => 3,
            Command::Specify => 4,
            Command::Format | Command::ScanData | Command::ScanDataAndDeleted => 5,
        }
    }

    /// Does parameter 2 carry a record size and count?
    pub fn is_multi_record(self) -> bool {
        matches!(
            self,
            Command::ReadDataMulti
                | Command::ReadDataAndDeletedMulti
                | Command::WriteDataMulti
                | Command::WriteDeletedDataMulti
                | Command::VerifyMulti
        )
    }

    /// Transfers sector data to the host
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Command::ReadDataSingle
                | Command::ReadDataMulti
                | Command::ReadDataAndDeletedSingle
                | Command::ReadDataAndDeletedMulti
        )
    }

    /// Transfers sector data from the host
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Command::WriteDataSingle
                | Command::WriteDataMulti
                | Command::WriteDeletedDataSingle
                | Command::WriteDeletedDataMulti
        )
    }

    /// Carries on past sectors with a deleted data mark
    pub fn accepts_deleted(self) -> bool {
        matches!(
            self,
            Command::ReadDataAndDeletedSingle
                | Command::ReadDataAndDeletedMulti
                | Command::VerifySingle
                | Command::VerifyMulti
        )
    }

    /// Writes a deleted data mark
    pub fn writes_deleted(self) -> bool {
        matches!(
            self,
            Command::WriteDeletedDataSingle | Command::WriteDeletedDataMulti
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::ScanData => "SCAN DATA",
            Command::ScanDataAndDeleted => "SCAN DATA AND DELETED DATA",
            Command::WriteDataSingle => "WRITE DATA SINGLE RECORD",
            Command::WriteDataMulti => "WRITE DATA MULTI RECORD",
            Command::WriteDeletedDataSingle => "WRITE DELETED DATA SINGLE RECORD",
            Command::WriteDeletedDataMulti => "WRITE DELETED DATA MULTI RECORD",
            Command::ReadDataSingle => "READ DATA SINGLE RECORD",
            Command::ReadDataMulti => "READ DATA MULTI RECORD",
            Command::ReadDataAndDeletedSingle => "READ DATA AND DELETED DATA SINGLE RECORD",
            Command::ReadDataAndDeletedMulti => "READ DATA AND DELETED DATA MULTI RECORD",
            Command::ReadId => "READ ID",
            Command::VerifySingle => "VERIFY DATA AND DELETED DATA SINGLE RECORD",
            Command::VerifyMulti => "VERIFY DATA AND DELETED DATA MULTI RECORD",
            Command::Format => "FORMAT",
            Command::Seek => "SEEK",
            Command::ReadDriveStatus => "READ DRIVE STATUS",
            Command::Specify => "SPECIFY",
            Command::WriteSpecialRegister => "WRITE SPECIAL REGISTER",
            Command::ReadSpecialRegister => "READ SPECIAL REGISTER",
        };
        write!(f, "{}", name)
    }
}

/// What the controller is doing during the execution phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Sector data flows to the host
    Read,
    /// Sector data (or format IDs) flows from the host
    Write,
    /// ID fields flow to the host
    ReadId,
    /// Head is moving
    Seek,
}

/// Controller phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a command
    Idle,
    /// Collecting parameters
    Command,
    /// Executing
    Execution(Execution),
    /// A result waits to be read
    Result,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Command => write!(f, "command"),
            Phase::Execution(kind) => write!(f, "execution ({:?})", kind),
            Phase::Result => write!(f, "result"),
        }
    }
}

/// Timing values loaded by SPECIFY initialise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveTiming {
    /// Step rate in 2 ms units
    pub step_rate: u8,
    /// Head settling time in 2 ms units
    pub head_settling_time: u8,
    /// Index pulses before the head unloads
    pub index_count_before_unload: u8,
    /// Head load time in 8 ms units
    pub head_load_time: u8,
}

/// Intel 8271 command processor
pub struct I8271 {
    status: u8,
    result: u8,
    command_register: u8,
    command: Option<Command>,
    params: [u8; MAX_PARAMETERS],
    param_count: usize,
    params_written: usize,
    reset_register: u8,
    mode: u8,
    flags: u8,
    phase: Phase,
    irq: bool,
    drq: bool,

    drive: usize,
    side: u8,
    current_track: [u8; 2],
    bad_tracks: [u8; 4],
    timing: DriveTiming,
    drive_control_output: u8,

    /// Record being searched for
    id_r: u8,
    /// Record size code for multi-record commands
    record_size: Option<u8>,
    /// Records left to transfer
    counter: u8,
    /// Rotational index and length of the sector being written
    target: (usize, usize),

    buffer: Vec<u8>,
    transfer_index: usize,
    transfer_remaining: usize,
    data: u8,

    effects: Effects,
}

impl I8271 {
    /// Controller in its power-on state
    pub fn new() -> Self {
        Self {
            status: 0,
            result: RESULT_GOOD,
            command_register: 0,
            command: None,
            params: [0; MAX_PARAMETERS],
            param_count: 0,
            params_written: 0,
            reset_register: 0,
            mode: 0xC0,
            flags: 0,
            phase: Phase::Idle,
            irq: false,
            drq: false,
            drive: 0,
            side: 0,
            current_track: [0; 2],
            bad_tracks: [0xFF; 4],
            timing: DriveTiming::default(),
            drive_control_output: 0,
            id_r: 0,
            record_size: None,
            counter: 0,
            target: (0, 0),
            buffer: Vec::new(),
            transfer_index: 0,
            transfer_remaining: 0,
            data: 0,
            effects: Effects::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Last decoded command
    pub fn command(&self) -> Option<Command> {
        self.command
    }

    /// Status register without the read side effects
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Result register without the read side effects
    pub fn result(&self) -> u8 {
        self.result
    }

    /// Interrupt line
    pub fn irq(&self) -> bool {
        self.irq
    }

    /// DMA request line
    pub fn drq(&self) -> bool {
        self.drq
    }

    /// Mode register
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Is non-DMA mode selected?
    pub fn non_dma(&self) -> bool {
        self.mode & 0x01 != 0
    }

    /// Drive picked by the last command
    pub fn selected_drive(&self) -> usize {
        self.drive
    }

    /// Side picked through the drive control output port
    pub fn side(&self) -> u8 {
        self.side
    }

    /// Track the controller believes a surface's head is on
    pub fn current_track(&self, surface: usize) -> u8 {
        self.current_track[surface & 1]
    }

    /// Bad track register (`which` is 0 or 1)
    pub fn bad_track(&self, surface: usize, which: usize) -> u8 {
        self.bad_tracks[((surface & 1) << 1) + (which & 1)]
    }

    /// Timing loaded by SPECIFY
    pub fn timing(&self) -> DriveTiming {
        self.timing
    }

    /// Drive control output port
    pub fn drive_control_output(&self) -> u8 {
        self.drive_control_output
    }

    /// Power-on reset
    pub fn reset(&mut self) -> Effects {
        self.do_reset();
        self.take_effects()
    }

    /// Read a host register
    pub fn read(&mut self, offset: u8) -> (u8, Effects) {
        match offset & 0x03 {
            0 => (self.read_status(), Effects::new()),
            1 => self.read_result(),
            _ => (0xFF, Effects::new()),
        }
    }

    /// Write a host register
    pub fn write(&mut self, drives: &mut DriveTable, offset: u8, data: u8) -> Effects {
        match offset & 0x03 {
            0 => self.write_command(drives, data),
            1 => self.write_parameter(drives, data),
            2 => self.write_reset(data),
            _ => Effects::new(),
        }
    }

    /// Read the status register; bits 1:0 always read as zero
    pub fn read_status(&mut self) -> u8 {
        self.status &= !0x03;
        self.status
    }

    /// Read the result register.
    ///
    /// Clears the interrupt and result-full unless a command is in
    /// progress, in which case 0xFF is returned and nothing changes.
    pub fn read_result(&mut self) -> (u8, Effects) {
        if self.status & STATUS_BUSY != 0 {
            return (0xFF, Effects::new());
        }
        self.set_irq(false);
        self.status &= !STATUS_RESULT_FULL;
        if self.phase == Phase::Result {
            self.phase = Phase::Idle;
        }
        trace!("i8271: result {:02X}", self.result);
        (self.result, self.take_effects())
    }

    /// Write the command register
    pub fn write_command(&mut self, drives: &mut DriveTable, data: u8) -> Effects {
        if self.status & STATUS_BUSY != 0 {
            warn!("i8271: command {:02X} written while busy, ignored", data);
            return self.take_effects();
        }
        self.command_register = data;
        self.command = Command::from_opcode(data);
        self.status |= STATUS_BUSY | STATUS_COMMAND_FULL;
        self.status &= !(STATUS_PARAMETER_FULL | STATUS_RESULT_FULL);
        self.params_written = 0;
        self.param_count = self.command.map_or(0, Command::parameter_count);
        self.phase = Phase::Command;
        match self.command {
            Some(command) => trace!("i8271: command {:02X} {}", data, command),
            None => warn!("i8271: unrecognised command {:02X}", data),
        }
        self.check_all_parameters_written(drives);
        self.take_effects()
    }

    /// Write the parameter register
    pub fn write_parameter(&mut self, drives: &mut DriveTable, data: u8) -> Effects {
        if self.phase != Phase::Command || self.params_written >= self.param_count {
            trace!("i8271: parameter {:02X} ignored in {} phase", data, self.phase);
            return self.take_effects();
        }
        self.params[self.params_written] = data;
        self.params_written += 1;
        self.check_all_parameters_written(drives);
        self.take_effects()
    }

    /// Write the reset register; a falling edge on bit 0 resets the controller
    pub fn write_reset(&mut self, data: u8) -> Effects {
        if (data ^ self.reset_register) & 0x01 != 0 && data & 0x01 == 0 {
            self.do_reset();
        }
        self.reset_register = data;
        self.take_effects()
    }

    /// Read the data register (DMA acknowledge or non-DMA host read)
    pub fn read_data(&mut self, drives: &mut DriveTable) -> (u8, Effects) {
        self.clear_data_request();
        let reading = matches!(
            self.phase,
            Phase::Execution(Execution::Read | Execution::ReadId)
        );
        if reading && self.transfer_remaining > 0 {
            self.data = self.buffer.get(self.transfer_index).copied().unwrap_or(0xFF);
            self.transfer_index += 1;
            self.transfer_remaining -= 1;
            if self.transfer_remaining == 0 {
                self.command_continue(drives);
            } else {
                self.timed_data_request();
            }
        }
        (self.data, self.take_effects())
    }

    /// Write the data register
    pub fn write_data(&mut self, drives: &mut DriveTable, data: u8) -> Effects {
        self.data = data;
        self.clear_data_request();
        if self.phase == Phase::Execution(Execution::Write) && self.transfer_remaining > 0 {
            if let Some(slot) = self.buffer.get_mut(self.transfer_index) {
                *slot = data;
            }
            self.transfer_index += 1;
            self.transfer_remaining -= 1;
            if self.transfer_remaining == 0 {
                self.command_continue(drives);
            } else {
                self.timed_data_request();
            }
        }
        self.take_effects()
    }

    /// One of the controller's timers expired
    pub fn timer_expired(&mut self, timer: FdcTimer) -> Effects {
        match timer {
            FdcTimer::DataRequest => self.data_request(),
            FdcTimer::Complete => {
                trace!("i8271: command complete, result {:02X}", self.result);
                self.command_complete(true, true);
            }
        }
        self.take_effects()
    }

    fn take_effects(&mut self) -> Effects {
        std::mem::take(&mut self.effects)
    }

    fn do_reset(&mut self) {
        debug!("i8271: reset");
        self.status = 0;
        self.mode = 0xC0;
        self.param_count = 0;
        self.params_written = 0;
        self.command = None;
        self.phase = Phase::Idle;
        self.transfer_remaining = 0;
        self.effects.push(Effect::Disarm(FdcTimer::DataRequest));
        self.effects.push(Effect::Disarm(FdcTimer::Complete));
        self.set_irq(false);
        self.flags &= !FLAG_DATA_REQUEST;
        self.update_drq();
    }

    fn set_irq(&mut self, state: bool) {
        if state {
            self.status |= STATUS_INT_REQUEST;
        } else {
            self.status &= !STATUS_INT_REQUEST;
        }
        if self.irq != state {
            self.irq = state;
            self.effects.push(Effect::Irq(state));
        }
    }

    fn update_drq(&mut self) {
        let active = self.flags & FLAG_DATA_REQUEST != 0;
        if self.drq != active {
            self.drq = active;
            self.effects.push(Effect::Drq {
                active,
                read: self.flags & FLAG_DATA_DIRECTION != 0,
            });
        }
    }

    fn data_request(&mut self) {
        self.flags |= FLAG_DATA_REQUEST;
        if self.non_dma() {
            self.status |= STATUS_NON_DMA_REQUEST;
            self.set_irq(true);
        } else {
            self.status &= !STATUS_NON_DMA_REQUEST;
            self.update_drq();
        }
    }

    fn clear_data_request(&mut self) {
        self.flags &= !FLAG_DATA_REQUEST;
        if self.non_dma() {
            self.status &= !STATUS_NON_DMA_REQUEST;
            self.set_irq(false);
        } else {
            self.update_drq();
        }
    }

    fn timed_data_request(&mut self) {
        self.effects.push(Effect::Disarm(FdcTimer::Complete));
        self.effects
            .push(Effect::Arm(FdcTimer::DataRequest, DATA_REQUEST_DELAY_US));
    }

    fn timed_complete(&mut self) {
        self.effects.push(Effect::Disarm(FdcTimer::DataRequest));
        self.effects
            .push(Effect::Arm(FdcTimer::Complete, COMPLETION_DELAY_US));
    }

    fn command_complete(&mut self, result: bool, irq: bool) {
        self.status &= !(STATUS_BUSY | STATUS_NON_DMA_REQUEST);
        if result {
            self.status |= STATUS_RESULT_FULL;
            self.phase = Phase::Result;
        } else {
            self.phase = Phase::Idle;
        }
        if irq {
            self.set_irq(true);
        }
        self.drive_control_output &= !DCO_WRITE_ENABLE;
    }

    /// Finish at once with a result code and an interrupt, no timers
    fn complete_now(&mut self, code: u8) {
        trace!("i8271: completing immediately with {:02X}", code);
        self.result = code;
        self.transfer_remaining = 0;
        self.effects.push(Effect::Disarm(FdcTimer::DataRequest));
        self.effects.push(Effect::Disarm(FdcTimer::Complete));
        self.command_complete(true, true);
    }

    fn check_all_parameters_written(&mut self, drives: &mut DriveTable) {
        if self.params_written == self.param_count {
            self.status &= !STATUS_COMMAND_FULL;
            self.execute(drives);
        }
    }

    /// Command bit 7 selects drive 1 and wins over bit 6 (drive 0); with
    /// neither set the previous selection stays
    fn select_drive(&mut self) {
        if self.command_register & 0x40 != 0 {
            self.drive = 0;
        }
        if self.command_register & 0x80 != 0 {
            self.drive = 1;
        }
    }

    fn execute(&mut self, drives: &mut DriveTable) {
        self.result = RESULT_GOOD;
        let Some(command) = self.command else {
            self.complete_now(RESULT_COMMAND_ERROR);
            return;
        };
        debug!(
            "i8271: {} {:02X?}",
            command,
            &self.params[..self.param_count]
        );
        match command {
            Command::Specify => self.specify(),
            Command::ReadSpecialRegister => self.read_special_register(drives),
            Command::WriteSpecialRegister => self.write_special_register(drives),
            Command::ReadDriveStatus => self.read_drive_status(drives),
            Command::Seek => self.seek(drives),
            Command::ReadId => self.read_id(drives),
            Command::Format => self.format(drives),
            Command::VerifySingle | Command::VerifyMulti => self.verify(drives, command),
            Command::ScanData | Command::ScanDataAndDeleted => {
                warn!("i8271: {} is not implemented", command);
                self.complete_now(RESULT_COMMAND_ERROR);
            }
            c if c.is_read() => self.start_read(drives, c),
            c if c.is_write() => self.start_write(drives, c),
            _ => self.complete_now(RESULT_COMMAND_ERROR),
        }
    }

    fn specify(&mut self) {
        match self.params[0] {
            SPECIFY_INITIALISE => {
                self.timing = DriveTiming {
                    step_rate: self.params[1],
                    head_settling_time: self.params[2],
                    index_count_before_unload: (self.params[3] >> 4) & 0x0F,
                    head_load_time: self.params[3] & 0x0F,
                };
                debug!("i8271: initialised {:?}", self.timing);
            }
            SPECIFY_BAD_TRACKS_0 => self.load_bad_tracks(0),
            SPECIFY_BAD_TRACKS_1 => self.load_bad_tracks(1),
            other => debug!("i8271: unknown SPECIFY type {:02X}", other),
        }
        self.command_complete(false, false);
    }

    fn load_bad_tracks(&mut self, surface: usize) {
        self.bad_tracks[surface << 1] = self.params[1];
        self.bad_tracks[(surface << 1) + 1] = self.params[2];
        self.current_track[surface] = self.params[3];
    }

    fn read_special_register(&mut self, drives: &mut DriveTable) {
        let data = match self.params[0] {
            REG_MODE => self.mode,
            REG_SURFACE_0_CURRENT_TRACK => self.current_track[0],
            REG_SURFACE_1_CURRENT_TRACK => self.current_track[1],
            REG_SURFACE_0_BAD_TRACK_1 => self.bad_tracks[0],
            REG_SURFACE_0_BAD_TRACK_2 => self.bad_tracks[1],
            REG_SURFACE_1_BAD_TRACK_1 => self.bad_tracks[2],
            REG_SURFACE_1_BAD_TRACK_2 => self.bad_tracks[3],
            REG_DRIVE_CONTROL_OUTPUT => {
                self.select_drive();
                (self.drive_control_output & !DCO_SELECT) | (self.command_register & DCO_SELECT)
            }
            REG_DRIVE_CONTROL_INPUT => {
                let flags = drives.get(self.drive).map_or(
                    DriveFlags(DriveFlags::WRITE_PROTECTED | DriveFlags::HEAD_AT_TRACK_0),
                    Drive::flags,
                );
                let mut input = 0x44;
                if !flags.write_protected() {
                    input |= 0x08;
                }
                if !flags.at_track_0() {
                    input |= 0x02;
                }
                input
            }
            other => {
                debug!("i8271: read of unknown special register {:02X}", other);
                0xFF
            }
        };
        self.result = data;
        self.command_complete(true, false);
    }

    fn write_special_register(&mut self, drives: &mut DriveTable) {
        let value = self.params[1];
        match self.params[0] {
            REG_MODE => {
                self.mode = value;
                debug!(
                    "i8271: mode {:02X} ({})",
                    value,
                    if self.non_dma() { "non-DMA" } else { "DMA" }
                );
            }
            REG_SURFACE_0_CURRENT_TRACK => self.current_track[0] = value,
            REG_SURFACE_1_CURRENT_TRACK => self.current_track[1] = value,
            REG_SURFACE_0_BAD_TRACK_1 => self.bad_tracks[0] = value,
            REG_SURFACE_0_BAD_TRACK_2 => self.bad_tracks[1] = value,
            REG_SURFACE_1_BAD_TRACK_1 => self.bad_tracks[2] = value,
            REG_SURFACE_1_BAD_TRACK_2 => self.bad_tracks[3] = value,
            REG_DRIVE_CONTROL_OUTPUT => self.write_drive_control_output(drives, value),
            REG_DRIVE_CONTROL_INPUT => trace!("i8271: drive control input is read-only"),
            other => debug!("i8271: write of unknown special register {:02X}", other),
        }
        self.command_complete(false, false);
    }

    fn write_drive_control_output(&mut self, drives: &mut DriveTable, value: u8) {
        self.select_drive();
        self.side = (value & DCO_SIDE) >> 5;
        if let Some(drive) = drives.get_mut(self.drive) {
            drive.set_motor(value & DCO_LOAD_HEAD != 0);
            drive.set_ready_state(true, true);
            let stepped = (self.drive_control_output ^ value) & DCO_STEP != 0;
            if stepped && value & DCO_STEP != 0 {
                drive.seek(if value & DCO_DIRECTION != 0 { 1 } else { -1 });
            }
        }
        self.drive_control_output = value;
    }

    fn read_drive_status(&mut self, drives: &mut DriveTable) {
        self.select_drive();
        let mut status = 0;
        if drives.get(0).is_some_and(|d| d.get_flag(DriveFlags::READY)) {
            status |= 0x04;
        }
        if drives.get(1).is_some_and(|d| d.get_flag(DriveFlags::READY)) {
            status |= 0x40;
        }
        if let Some(drive) = drives.get(self.drive) {
            if drive.get_flag(DriveFlags::WRITE_PROTECTED) {
                status |= 0x08;
            }
            if drive.get_flag(DriveFlags::HEAD_AT_TRACK_0) {
                status |= 0x02;
            }
        }
        self.result = status;
        self.command_complete(true, false);
    }

    fn seek_to_track(&mut self, drive: &mut Drive, track: u8) {
        let surface = self.drive & 1;
        if track == 0 {
            let mut steps = MAX_RESTORE_STEPS;
            while !drive.get_flag(DriveFlags::HEAD_AT_TRACK_0) && steps > 0 {
                drive.seek(-1);
                steps -= 1;
            }
            if !drive.get_flag(DriveFlags::HEAD_AT_TRACK_0) {
                warn!("i8271: drive {} never reached track 0", self.drive);
                self.result |= RESULT_TRACK_0_NOT_FOUND;
            }
            self.current_track[surface] = 0;
            self.drive_control_output &= !DCO_DIRECTION;
        } else {
            let delta = track as i32 - self.current_track[surface] as i32;
            if delta > 0 {
                self.drive_control_output |= DCO_DIRECTION;
            }
            drive.seek(delta);
            self.current_track[surface] = track;
        }
    }

    fn seek(&mut self, drives: &mut DriveTable) {
        self.select_drive();
        let track = self.params[0];
        if let Some(drive) = drives.get_mut(self.drive) {
            self.seek_to_track(drive, track);
        }
        self.phase = Phase::Execution(Execution::Seek);
        self.timed_complete();
    }

    fn setup_records(&mut self, command: Command) {
        self.id_r = self.params[1];
        if command.is_multi_record() {
            self.record_size = Some((self.params[2] >> 5) & 0x07);
            self.counter = self.params[2] & 0x1F;
        } else {
            self.record_size = None;
            self.counter = 1;
        }
    }

    fn record_length(&self, info: &SectorInfo) -> usize {
        self.record_size
            .map_or(info.id.size_bytes(), |n| 128usize << n)
    }

    /// Scan IDs for the wanted record, giving up after two index pulses
    fn find_sector(&mut self, drive: &mut Drive) -> Result<(usize, SectorInfo), u8> {
        let track = self.current_track[self.drive & 1];
        let mut index_count = 0;
        let mut id_crc_seen = false;
        while index_count < 2 {
            if let Some((index, info)) = drive.get_next_sector_id(self.side) {
                if info.id.sector == self.id_r {
                    if info.flags.id_crc_error() {
                        id_crc_seen = true;
                    } else if info.id.track == track {
                        return Ok((index, info));
                    } else {
                        debug!(
                            "i8271: record {} found on track {}, expected {}",
                            self.id_r, info.id.track, track
                        );
                        return Err(RESULT_SECTOR_NOT_FOUND);
                    }
                }
            }
            if drive.sector_cursor_wrapped() {
                index_count += 1;
            }
        }
        trace!("i8271: record {} not found on track {}", self.id_r, track);
        Err(if id_crc_seen {
            RESULT_ID_CRC_ERROR
        } else {
            RESULT_SECTOR_NOT_FOUND
        })
    }

    fn note_sector_flags(&mut self, info: &SectorInfo) {
        if info.flags.data_crc_error() {
            self.result |= RESULT_DATA_CRC_ERROR;
        }
        if info.flags.is_deleted() {
            self.result |= RESULT_DELETED_DATA;
        }
    }

    /// Stop a multi-record command after the current record?
    fn should_stop(&self, command: Command) -> bool {
        self.result & RESULT_ERROR_MASK != 0
            || (self.result & RESULT_DELETED_DATA != 0 && !command.accepts_deleted())
    }

    fn begin_transfer(&mut self, kind: Execution, len: usize) {
        if matches!(kind, Execution::Write) {
            self.flags &= !FLAG_DATA_DIRECTION;
        } else {
            self.flags |= FLAG_DATA_DIRECTION;
        }
        self.transfer_index = 0;
        self.transfer_remaining = len;
        self.phase = Phase::Execution(kind);
    }

    /// Selected drive if it is ready
    fn ready_drive<'a>(&self, drives: &'a mut DriveTable) -> Option<&'a mut Drive> {
        drives
            .get_mut(self.drive)
            .filter(|d| d.get_flag(DriveFlags::READY))
    }

    fn start_read(&mut self, drives: &mut DriveTable, command: Command) {
        self.select_drive();
        self.setup_records(command);
        let Some(drive) = self.ready_drive(drives) else {
            self.complete_now(RESULT_NOT_READY);
            return;
        };
        self.seek_to_track(drive, self.params[0]);
        if self.counter == 0 {
            self.complete_now(self.result);
            return;
        }
        self.do_read(drive);
    }

    fn do_read(&mut self, drive: &mut Drive) {
        match self.find_sector(drive) {
            Ok((index, info)) => {
                let len = self.record_length(&info);
                self.buffer.clear();
                self.buffer.resize(len, 0);
                if let Err(e) = drive.read_sector(self.side, index, &mut self.buffer) {
                    warn!("i8271: read of record {} failed: {}", self.id_r, e);
                    self.complete_now(RESULT_SECTOR_NOT_FOUND);
                    return;
                }
                self.note_sector_flags(&info);
                self.begin_transfer(Execution::Read, len);
                self.timed_data_request();
            }
            Err(code) => self.complete_now(code),
        }
    }

    fn start_write(&mut self, drives: &mut DriveTable, command: Command) {
        self.select_drive();
        self.drive_control_output &= !DCO_WRITE_ENABLE;
        self.setup_records(command);
        let Some(drive) = self.ready_drive(drives) else {
            self.complete_now(RESULT_NOT_READY);
            return;
        };
        if drive.get_flag(DriveFlags::WRITE_PROTECTED) {
            self.complete_now(RESULT_WRITE_PROTECTED);
            return;
        }
        self.drive_control_output |= DCO_WRITE_ENABLE;
        self.seek_to_track(drive, self.params[0]);
        if self.counter == 0 {
            self.complete_now(self.result);
            return;
        }
        self.do_write(drive);
    }

    fn do_write(&mut self, drive: &mut Drive) {
        match self.find_sector(drive) {
            Ok((index, info)) => {
                let len = self.record_length(&info);
                self.target = (index, info.id.size_bytes());
                self.buffer.clear();
                self.buffer.resize(len, 0);
                self.begin_transfer(Execution::Write, len);
                self.timed_data_request();
            }
            Err(code) => self.complete_now(code),
        }
    }

    fn verify(&mut self, drives: &mut DriveTable, command: Command) {
        self.select_drive();
        self.setup_records(command);
        let Some(drive) = self.ready_drive(drives) else {
            self.complete_now(RESULT_NOT_READY);
            return;
        };
        self.seek_to_track(drive, self.params[0]);
        if self.counter == 0 {
            self.complete_now(self.result);
            return;
        }
        while self.counter > 0 {
            match self.find_sector(drive) {
                Ok((_, info)) => self.note_sector_flags(&info),
                Err(code) => {
                    self.complete_now(code);
                    return;
                }
            }
            if self.should_stop(command) {
                break;
            }
            self.counter -= 1;
            self.id_r = self.id_r.wrapping_add(1);
        }
        self.phase = Phase::Execution(Execution::Read);
        self.timed_complete();
    }

    fn read_id(&mut self, drives: &mut DriveTable) {
        self.select_drive();
        let Some(drive) = self.ready_drive(drives) else {
            self.complete_now(RESULT_NOT_READY);
            return;
        };
        self.counter = self.params[2];
        self.seek_to_track(drive, self.params[0]);
        if self.counter == 0 {
            self.complete_now(self.result);
            return;
        }
        self.do_read_id(drive);
    }

    fn do_read_id(&mut self, drive: &mut Drive) {
        match drive.get_next_sector_id(self.side) {
            Some((_, info)) => {
                self.buffer.clear();
                self.buffer.extend_from_slice(&info.id.to_bytes());
                self.begin_transfer(Execution::ReadId, 4);
                self.timed_data_request();
            }
            None => self.complete_now(RESULT_SECTOR_NOT_FOUND),
        }
    }

    fn format(&mut self, drives: &mut DriveTable) {
        self.select_drive();
        self.drive_control_output &= !DCO_WRITE_ENABLE;
        let Some(drive) = self.ready_drive(drives) else {
            self.complete_now(RESULT_NOT_READY);
            return;
        };
        if drive.get_flag(DriveFlags::WRITE_PROTECTED) {
            self.complete_now(RESULT_WRITE_PROTECTED);
            return;
        }
        self.drive_control_output |= DCO_WRITE_ENABLE;
        self.seek_to_track(drive, self.params[0]);
        self.record_size = Some((self.params[2] >> 5) & 0x07);
        self.counter = self.params[2] & 0x1F;
        if self.counter == 0 {
            self.complete_now(self.result);
            return;
        }
        // the host supplies C, H, R, N for every sector
        let len = self.counter as usize * 4;
        self.buffer.clear();
        self.buffer.resize(len, 0);
        self.begin_transfer(Execution::Write, len);
        self.timed_data_request();
    }

    fn command_continue(&mut self, drives: &mut DriveTable) {
        let Some(command) = self.command else {
            return;
        };
        let Some(drive) = drives.get_mut(self.drive) else {
            self.complete_now(RESULT_NOT_READY);
            return;
        };
        match command {
            Command::ReadId => {
                self.counter = self.counter.saturating_sub(1);
                if self.counter == 0 {
                    self.timed_complete();
                } else {
                    self.do_read_id(drive);
                }
            }
            Command::Format => {
                for id in self.buffer.chunks(4) {
                    trace!("i8271: format ID {:02X?}", id);
                }
                if let Err(e) = drive.format_track(self.side, FORMAT_FILLER) {
                    warn!("i8271: format failed: {}", e);
                    let code = if e.is_unsupported() {
                        RESULT_WRITE_PROTECTED
                    } else {
                        RESULT_SECTOR_NOT_FOUND
                    };
                    self.complete_now(code);
                    return;
                }
                self.timed_complete();
            }
            c if c.is_read() => {
                self.counter = self.counter.saturating_sub(1);
                self.id_r = self.id_r.wrapping_add(1);
                if self.counter == 0 || self.should_stop(c) {
                    self.timed_complete();
                } else {
                    self.do_read(drive);
                }
            }
            c if c.is_write() => {
                let (index, size) = self.target;
                if self.buffer.len() < size {
                    self.buffer.resize(size, 0);
                }
                if let Err(e) = drive.write_sector(self.side, index, &self.buffer, c.writes_deleted()) {
                    warn!("i8271: write of record {} failed: {}", self.id_r, e);
                    let code = if e.is_unsupported() {
                        RESULT_WRITE_PROTECTED
                    } else {
                        RESULT_SECTOR_NOT_FOUND
                    };
                    self.complete_now(code);
                    return;
                }
                self.counter = self.counter.saturating_sub(1);
                self.id_r = self.id_r.wrapping_add(1);
                if self.counter == 0 {
                    self.timed_complete();
                } else {
                    self.do_write(drive);
                }
            }
            _ => {}
        }
    }
}

impl Default for I8271 {
    fn default() -> Self {
        Self::new()
    }
}
