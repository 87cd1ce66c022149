//! Command dispatch
//!
//! Maps every [`Opcode`] to its handler. The table is the `match` in
//! [`ProxyContext::handle`]; nothing is registered at runtime.

use alloc::vec::Vec;

use crate::config::{ProxyConfig, MAX_DATA, PROTOCOL_VERSION};
use crate::error::Status;
use crate::platform::{BootVector, DeviceInfo, ImageLoader, Platform, Subsystem, BOOT_ARGS};
use crate::proxy::access::{AccessLayer, Rights, Width, CALL_ARGS};
use crate::proxy::channel::{ChannelError, ChannelTable, Direction};
use crate::proxy::codec::{Command, Data, Opcode, Reply};
use crate::proxy::framer::FramerStats;

/// Version reply feature bit: random-access transfers
pub const FEATURE_RANDOM_ACCESS: u64 = 1 << 0;
/// Version reply feature bit: no access policy in force
pub const FEATURE_UNRESTRICTED: u64 = 1 << 1;

/// Boot flag: keep the boot logo on screen
pub const BOOT_RESTORE_LOGO: u64 = 1 << 0;

/// Named actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Action {
    /// Re-read board identity from the hardware description
    ReprobeDevice = 0,
    /// Re-run bring-up of one subsystem
    Reinit = 1,
    /// Take the appended payload as the next stage
    Chainload = 2,
    /// Report link and command counters
    Stats = 3,
}

impl Action {
    pub fn from_u64(n: u64) -> Option<Self> {
        match n {
            0 => Some(Action::ReprobeDevice),
            1 => Some(Action::Reinit),
            2 => Some(Action::Chainload),
            3 => Some(Action::Stats),
            _ => None,
        }
    }
}

/// Per-session command counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub served: u64,
    pub failed: u64,
}

type Handled = Result<Reply, Status>;

/// Everything a handler may touch
///
/// Board identity and the pending boot vector live here rather than in
/// globals, so handlers only see what the session hands them.
pub struct ProxyContext<'a> {
    access: AccessLayer<'a>,
    platform: &'a mut dyn Platform,
    loader: &'a mut dyn ImageLoader,
    channels: ChannelTable,
    device: DeviceInfo,
    pending: Option<BootVector>,
    stats: ServeStats,
}

impl<'a> ProxyContext<'a> {
    pub fn new(
        access: AccessLayer<'a>,
        platform: &'a mut dyn Platform,
        loader: &'a mut dyn ImageLoader,
        device: DeviceInfo,
        config: &ProxyConfig,
    ) -> Self {
        ProxyContext {
            access,
            platform,
            loader,
            channels: ChannelTable::new(config.max_transfers),
            device,
            pending: None,
            stats: ServeStats::default(),
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn stats(&self) -> ServeStats {
        self.stats
    }

    pub fn open_transfers(&self) -> usize {
        self.channels.open_count()
    }

    pub fn platform(&mut self) -> &mut dyn Platform {
        &mut *self.platform
    }

    /// Take the vector of an accepted boot request, if any
    pub fn take_boot(&mut self) -> Option<BootVector> {
        self.pending.take()
    }

    /// Count a command that never decoded
    pub fn note_rejected(&mut self) {
        self.stats.failed += 1;
    }

    /// Serve one command; always yields exactly one reply
    pub fn handle(&mut self, cmd: &Command, link: FramerStats) -> Reply {
        let handled = match cmd.opcode {
            Opcode::Nop => Ok(Reply::ok(cmd)),
            Opcode::Version => self.cmd_version(cmd),
            Opcode::DeviceInfo => self.cmd_device_info(cmd),
            Opcode::GetProperty => self.cmd_get_property(cmd),
            Opcode::Read8 => self.cmd_read_reg(cmd, Width::W8),
            Opcode::Read16 => self.cmd_read_reg(cmd, Width::W16),
            Opcode::Read32 => self.cmd_read_reg(cmd, Width::W32),
            Opcode::Read64 => self.cmd_read_reg(cmd, Width::W64),
            Opcode::Write8 => self.cmd_write_reg(cmd, Width::W8),
            Opcode::Write16 => self.cmd_write_reg(cmd, Width::W16),
            Opcode::Write32 => self.cmd_write_reg(cmd, Width::W32),
            Opcode::Write64 => self.cmd_write_reg(cmd, Width::W64),
            Opcode::MemRead => self.cmd_mem_read(cmd),
            Opcode::MemWrite => self.cmd_mem_write(cmd),
            Opcode::MemFill => self.cmd_mem_fill(cmd),
            Opcode::Call => self.cmd_call(cmd),
            Opcode::XferBegin => self.cmd_xfer_begin(cmd),
            Opcode::XferPush => self.cmd_xfer_push(cmd),
            Opcode::XferPull => self.cmd_xfer_pull(cmd),
            Opcode::XferEnd => self.cmd_xfer_end(cmd),
            Opcode::XferAbort => self.cmd_xfer_abort(cmd),
            Opcode::Action => self.cmd_action(cmd, link),
            Opcode::Boot => self.cmd_boot(cmd),
        };

        let reply = handled.unwrap_or_else(|status| Reply::error(cmd, status));
        if reply.status.is_ok() {
            self.stats.served += 1;
        } else {
            self.stats.failed += 1;
            log::debug!("{:?} seq {}: {}", cmd.opcode, cmd.seq, reply.status);
        }
        reply
    }

    fn cmd_version(&mut self, cmd: &Command) -> Handled {
        let mut features = FEATURE_RANDOM_ACCESS;
        if self.access.policy().is_unrestricted() {
            features |= FEATURE_UNRESTRICTED;
        }
        Ok(Reply::ok(cmd)
            .word(PROTOCOL_VERSION)
            .word(features)
            .word(MAX_DATA as u64))
    }

    fn cmd_device_info(&mut self, cmd: &Command) -> Handled {
        Ok(Reply::ok(cmd)
            .word(self.device.board_id as u64)
            .word(self.device.chip_id as u64)
            .word(self.access.current_el() as u64)
            .with_data(self.device.model.as_bytes()))
    }

    /// data: `path\0name[\0]`
    fn cmd_get_property(&mut self, cmd: &Command) -> Handled {
        let mut parts = cmd.data.splitn(2, |&b| b == 0);
        let path = parts.next().ok_or(Status::InvalidArgument)?;
        let name = parts.next().ok_or(Status::InvalidArgument)?;
        let name = name.strip_suffix(b"\0").unwrap_or(name);
        let path = core::str::from_utf8(path).map_err(|_| Status::InvalidArgument)?;
        let name = core::str::from_utf8(name).map_err(|_| Status::InvalidArgument)?;

        let value: Vec<u8> = self.platform.device_property(path, name)?;
        if value.len() > MAX_DATA {
            return Err(Status::OutOfRange);
        }
        Ok(Reply::ok(cmd).with_data(&value))
    }

    fn cmd_read_reg(&mut self, cmd: &Command, width: Width) -> Handled {
        let value = self.access.read_reg(cmd.arg(0), width)?;
        Ok(Reply::ok(cmd).word(value))
    }

    fn cmd_write_reg(&mut self, cmd: &Command, width: Width) -> Handled {
        self.access.write_reg(cmd.arg(0), width, cmd.arg(1))?;
        Ok(Reply::ok(cmd))
    }

    fn cmd_mem_read(&mut self, cmd: &Command) -> Handled {
        let (addr, len) = (cmd.arg(0), cmd.arg(1));
        if len > MAX_DATA as u64 {
            return Err(Status::InvalidArgument);
        }
        let mut data = Data::new();
        let _ = data.resize(len as usize, 0);
        self.access.read(addr, &mut data)?;
        Ok(Reply::ok(cmd).with_data(&data))
    }

    fn cmd_mem_write(&mut self, cmd: &Command) -> Handled {
        self.access.write(cmd.arg(0), &cmd.data)?;
        Ok(Reply::ok(cmd))
    }

    fn cmd_mem_fill(&mut self, cmd: &Command) -> Handled {
        let width = Width::from_bytes(cmd.arg(3)).ok_or(Status::InvalidArgument)?;
        self.access.fill(cmd.arg(0), cmd.arg(1), cmd.arg(2), width)?;
        Ok(Reply::ok(cmd))
    }

    /// A trapped call answers `ExecutionFault` with `[esr, far, elr]`
    fn cmd_call(&mut self, cmd: &Command) -> Handled {
        let addr = cmd.arg(0);
        if self.channels.is_tainted(addr, 4) {
            log::warn!("refusing call into unverified memory at {:#x}", addr);
            return Err(Status::IntegrityError);
        }
        let mut args = [0u64; CALL_ARGS];
        args.copy_from_slice(&cmd.args()[1..1 + CALL_ARGS]);

        match self.access.call(addr, &args) {
            Ok([x0, x1]) => Ok(Reply::ok(cmd).word(x0).word(x1)),
            Err(crate::error::AccessError::Fault(info)) => {
                log::warn!("call {:#x} faulted: ESR {:#x} FAR {:#x}", addr, info.esr, info.far);
                Ok(Reply::error(cmd, Status::ExecutionFault)
                    .word(info.esr)
                    .word(info.far)
                    .word(info.elr))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn cmd_xfer_begin(&mut self, cmd: &Command) -> Handled {
        let direction = Direction::from_u64(cmd.arg(0)).ok_or(Status::InvalidArgument)?;
        let id = self
            .channels
            .begin(&self.access, direction, cmd.arg(1), cmd.arg(2), cmd.arg(3))?;
        Ok(Reply::ok(cmd).word(id as u64))
    }

    fn cmd_xfer_push(&mut self, cmd: &Command) -> Handled {
        let id = channel_id(cmd.arg(0))?;
        let next = self
            .channels
            .push(&mut self.access, id, cmd.arg(1), &cmd.data)?;
        Ok(Reply::ok(cmd).word(next))
    }

    fn cmd_xfer_pull(&mut self, cmd: &Command) -> Handled {
        let id = channel_id(cmd.arg(0))?;
        let (next, data) = self
            .channels
            .pull(&mut self.access, id, cmd.arg(1), cmd.arg(2))?;
        Ok(Reply::ok(cmd).word(next).with_data(&data))
    }

    /// A mismatch still reports what the device computed
    fn cmd_xfer_end(&mut self, cmd: &Command) -> Handled {
        let id = channel_id(cmd.arg(0))?;
        match self.channels.end(&mut self.access, id, cmd.arg(1) as u32) {
            Ok(done) => Ok(Reply::ok(cmd).word(done.crc as u64).word(done.len)),
            Err(ChannelError::Mismatch { crc, len }) => Ok(Reply::error(cmd, Status::IntegrityError)
                .word(crc as u64)
                .word(len)),
            Err(e) => Err(e.into()),
        }
    }

    fn cmd_xfer_abort(&mut self, cmd: &Command) -> Handled {
        self.channels.abort(channel_id(cmd.arg(0))?)?;
        Ok(Reply::ok(cmd))
    }

    fn cmd_action(&mut self, cmd: &Command, link: FramerStats) -> Handled {
        let action = Action::from_u64(cmd.arg(0)).ok_or(Status::InvalidArgument)?;
        match action {
            Action::ReprobeDevice => {
                self.device = DeviceInfo::probe(&*self.platform);
                self.device.log();
                Ok(Reply::ok(cmd)
                    .word(self.device.board_id as u64)
                    .word(self.device.chip_id as u64))
            }
            Action::Reinit => {
                let subsystem = Subsystem::from_u64(cmd.arg(1)).ok_or(Status::InvalidArgument)?;
                self.platform.init(subsystem)?;
                log::info!("{:?} reinitialized", subsystem);
                Ok(Reply::ok(cmd))
            }
            Action::Chainload => {
                if let Some((base, len)) = self.loader.source_span(self.access.privileged()) {
                    if self.channels.is_tainted(base, len) {
                        log::warn!("refusing chainload from unverified payload at {:#x}", base);
                        return Err(Status::IntegrityError);
                    }
                }
                let vector = self.loader.load_candidate(self.access.privileged())?;
                let entry = vector.entry();
                self.accept_boot(vector)?;
                Ok(Reply::ok(cmd).word(entry))
            }
            Action::Stats => Ok(Reply::ok(cmd)
                .word(link.frames_rx)
                .word(link.crc_errors + link.resyncs)
                .word(self.stats.served)
                .word(self.stats.failed)),
        }
    }

    fn cmd_boot(&mut self, cmd: &Command) -> Handled {
        let flags = cmd.arg(6);
        if flags & !BOOT_RESTORE_LOGO != 0 {
            return Err(Status::InvalidArgument);
        }
        let mut args = [0u64; BOOT_ARGS];
        args.copy_from_slice(&cmd.args()[1..1 + BOOT_ARGS]);
        let vector = BootVector::new(cmd.arg(0), args, flags & BOOT_RESTORE_LOGO != 0)
            .ok_or(Status::InvalidArgument)?;
        self.accept_boot(vector)?;
        Ok(Reply::ok(cmd))
    }

    /// Refuse entries outside executable memory or inside unverified data
    fn accept_boot(&mut self, vector: BootVector) -> Result<(), Status> {
        let entry = vector.entry();
        self.access.policy().check(entry, 4, Rights::EXECUTE)?;
        if self.channels.is_tainted(entry, 4) {
            log::warn!("refusing boot into unverified memory at {:#x}", entry);
            return Err(Status::IntegrityError);
        }
        log::info!("boot requested: {}", vector);
        self.pending = Some(vector);
        Ok(())
    }
}

fn channel_id(word: u64) -> Result<u32, Status> {
    u32::try_from(word).map_err(|_| Status::InvalidChannel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::access::{AccessPolicy, MemoryRegion};
    use crate::proxy::checksum::Crc32;
    use crate::platform::PayloadError;
    use crate::proxy::access::Privileged;
    use crate::payload::PayloadScanner;
    use crate::sim::{self, SimMemory, SimPlatform};

    const BASE: u64 = 0x4000_0000;

    struct NoPayload;

    impl ImageLoader for NoPayload {
        fn load_candidate(&mut self, _mem: &mut dyn Privileged) -> Result<BootVector, PayloadError> {
            Err(PayloadError::NoValidImage)
        }

        fn source_span(&self, _mem: &mut dyn Privileged) -> Option<(u64, u64)> {
            None
        }
    }

    struct Fixture<L = NoPayload> {
        mem: SimMemory,
        platform: SimPlatform,
        loader: L,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture::with_loader(NoPayload)
        }
    }

    impl<L: ImageLoader> Fixture<L> {
        fn with_loader(loader: L) -> Self {
            let mut platform = SimPlatform::new();
            platform.set_property("/", "model", b"sim board\0");
            platform.set_property("/chosen", "board-id", &7u32.to_be_bytes());
            Fixture {
                mem: SimMemory::new(BASE, 0x1_0000),
                platform,
                loader,
            }
        }

        fn context(&mut self) -> ProxyContext<'_> {
            let policy = AccessPolicy::new()
                .allow(MemoryRegion::new(BASE, 0x1_0000, Rights::ALL));
            let device = DeviceInfo::probe(&self.platform);
            ProxyContext::new(
                AccessLayer::new(&mut self.mem, policy),
                &mut self.platform,
                &mut self.loader,
                device,
                &ProxyConfig::DEFAULT,
            )
        }
    }

    fn run(ctx: &mut ProxyContext<'_>, cmd: Command) -> Reply {
        ctx.handle(&cmd, FramerStats::default())
    }

    #[test]
    fn version_reports_protocol_and_limits() {
        let mut fx = Fixture::new();
        let mut ctx = fx.context();
        let reply = run(&mut ctx, Command::new(Opcode::Version, 1, &[]));
        assert_eq!(reply.status, Status::Ok);
        assert_eq!(reply.words()[0], PROTOCOL_VERSION);
        assert_eq!(reply.words()[2], MAX_DATA as u64);
    }

    #[test]
    fn device_info_carries_identity() {
        let mut fx = Fixture::new();
        let mut ctx = fx.context();
        let reply = run(&mut ctx, Command::new(Opcode::DeviceInfo, 2, &[]));
        assert_eq!(reply.words(), &[7, crate::platform::UNKNOWN_ID as u64, 1]);
        assert_eq!(&reply.data[..], b"sim board");
    }

    #[test]
    fn get_property_splits_path_and_name() {
        let mut fx = Fixture::new();
        let mut ctx = fx.context();
        let cmd = Command::new(Opcode::GetProperty, 3, &[]).with_data(b"/\0model\0");
        let reply = run(&mut ctx, cmd);
        assert_eq!(&reply.data[..], b"sim board\0");

        let cmd = Command::new(Opcode::GetProperty, 4, &[]).with_data(b"/\0missing");
        assert_eq!(run(&mut ctx, cmd).status, Status::NotFound);
        let cmd = Command::new(Opcode::GetProperty, 5, &[]).with_data(b"no separator");
        assert_eq!(run(&mut ctx, cmd).status, Status::InvalidArgument);
    }

    #[test]
    fn memory_commands_round_trip() {
        let mut fx = Fixture::new();
        let mut ctx = fx.context();
        let write = Command::new(Opcode::MemWrite, 1, &[BASE + 0x10]).with_data(&[9, 8, 7, 6]);
        assert!(run(&mut ctx, write).status.is_ok());

        let reply = run(&mut ctx, Command::new(Opcode::MemRead, 2, &[BASE + 0x10, 4]));
        assert_eq!(&reply.data[..], &[9, 8, 7, 6]);

        let reply = run(&mut ctx, Command::new(Opcode::Read16, 3, &[BASE + 0x10]));
        assert_eq!(reply.words(), &[0x0809]);

        let fill = Command::new(Opcode::MemFill, 4, &[BASE + 0x20, 8, 0xAB, 1]);
        assert!(run(&mut ctx, fill).status.is_ok());
        let reply = run(&mut ctx, Command::new(Opcode::Read64, 5, &[BASE + 0x20]));
        assert_eq!(reply.words(), &[0xABAB_ABAB_ABAB_ABAB]);

        let bad_width = Command::new(Opcode::MemFill, 6, &[BASE, 8, 0, 3]);
        assert_eq!(run(&mut ctx, bad_width).status, Status::InvalidArgument);
        let too_big = Command::new(Opcode::MemRead, 7, &[BASE, MAX_DATA as u64 + 1]);
        assert_eq!(run(&mut ctx, too_big).status, Status::InvalidArgument);
    }

    #[test]
    fn call_fault_reports_syndrome() {
        let mut fx = Fixture::new();
        fx.mem.install(BASE + 0x100, |a| Ok([a[0] * 2, a[1]]));
        let mut ctx = fx.context();

        let ok = run(&mut ctx, Command::new(Opcode::Call, 1, &[BASE + 0x100, 21, 5, 0, 0, 0, 0]));
        assert_eq!(ok.words(), &[42, 5]);

        let trap = run(&mut ctx, Command::new(Opcode::Call, 2, &[BASE + 0x200, 0, 0, 0, 0, 0, 0]));
        assert_eq!(trap.status, Status::ExecutionFault);
        assert_eq!(trap.words()[0], crate::sim::INSN_ABORT_ESR);
        assert_eq!(trap.words()[1], BASE + 0x200);
    }

    #[test]
    fn tainted_memory_refuses_call_and_boot_until_verified() {
        let mut fx = Fixture::new();
        let mut ctx = fx.context();
        let target = BASE + 0x1000;

        let begin = run(&mut ctx, Command::new(Opcode::XferBegin, 1, &[0, target, 4, 0]));
        let id = begin.words()[0];
        let call = Command::new(Opcode::Call, 2, &[target, 0, 0, 0, 0, 0, 0]);
        assert_eq!(run(&mut ctx, call.clone()).status, Status::IntegrityError);

        let push = Command::new(Opcode::XferPush, 3, &[id, 0]).with_data(&[1, 2, 3, 4]);
        assert_eq!(run(&mut ctx, push).words(), &[4]);
        let bad_end = run(&mut ctx, Command::new(Opcode::XferEnd, 4, &[id, 0]));
        assert_eq!(bad_end.status, Status::IntegrityError);
        assert_eq!(bad_end.words()[0], Crc32::of(&[1, 2, 3, 4]) as u64);

        let boot = Command::new(Opcode::Boot, 5, &[target, 0, 0, 0, 0, 0, 0]);
        assert_eq!(run(&mut ctx, boot.clone()).status, Status::IntegrityError);
        assert!(ctx.take_boot().is_none());

        // Re-send verified
        let begin = run(&mut ctx, Command::new(Opcode::XferBegin, 6, &[0, target, 4, 0]));
        let id = begin.words()[0];
        let push = Command::new(Opcode::XferPush, 7, &[id, 0]).with_data(&[1, 2, 3, 4]);
        run(&mut ctx, push);
        let crc = Crc32::of(&[1, 2, 3, 4]) as u64;
        assert!(run(&mut ctx, Command::new(Opcode::XferEnd, 8, &[id, crc])).status.is_ok());
        assert!(run(&mut ctx, boot).status.is_ok());
        assert_eq!(ctx.take_boot().map(|v| v.entry()), Some(target));
    }

    #[test]
    fn chainload_refuses_unverified_payload() {
        let window = BASE + 0x8000;
        let mut fx = Fixture::with_loader(PayloadScanner::new(window, window + 0x1000, BASE, 0));
        let mut ctx = fx.context();
        let kernel = sim::arm64_image(0x100, 0x100);
        let chainload = Command::new(Opcode::Action, 9, &[2, 0]);

        let begin = run(&mut ctx, Command::new(Opcode::XferBegin, 1, &[0, window, 0x100, 0]));
        let id = begin.words()[0];
        let push = Command::new(Opcode::XferPush, 2, &[id, 0]).with_data(&kernel);
        assert!(run(&mut ctx, push).status.is_ok());
        let bad_end = run(&mut ctx, Command::new(Opcode::XferEnd, 3, &[id, 0xBAD]));
        assert_eq!(bad_end.status, Status::IntegrityError);

        assert_eq!(run(&mut ctx, chainload.clone()).status, Status::IntegrityError);
        assert!(ctx.take_boot().is_none());
        assert_eq!(ctx.access.privileged().read_reg(BASE + 0x100, Width::W32), Ok(0));

        let begin = run(&mut ctx, Command::new(Opcode::XferBegin, 4, &[0, window, 0x100, 0]));
        let id = begin.words()[0];
        let push = Command::new(Opcode::XferPush, 5, &[id, 0]).with_data(&kernel);
        run(&mut ctx, push);
        let crc = Crc32::of(&kernel) as u64;
        assert!(run(&mut ctx, Command::new(Opcode::XferEnd, 6, &[id, crc])).status.is_ok());

        let reply = run(&mut ctx, chainload);
        assert_eq!(reply.words(), &[BASE + 0x100]);
        assert_eq!(ctx.take_boot().map(|v| v.entry()), Some(BASE + 0x100));
    }

    #[test]
    fn boot_rejects_null_entry_and_unknown_flags() {
        let mut fx = Fixture::new();
        let mut ctx = fx.context();
        let null = Command::new(Opcode::Boot, 1, &[0, 1, 2, 3, 4, 5, 0]);
        assert_eq!(run(&mut ctx, null).status, Status::InvalidArgument);
        let flags = Command::new(Opcode::Boot, 2, &[BASE, 0, 0, 0, 0, 0, 0x10]);
        assert_eq!(run(&mut ctx, flags).status, Status::InvalidArgument);
        let outside = Command::new(Opcode::Boot, 3, &[0x10, 0, 0, 0, 0, 0, 0]);
        assert_eq!(run(&mut ctx, outside).status, Status::OutOfRange);
        assert!(ctx.take_boot().is_none());
    }

    #[test]
    fn actions() {
        let mut fx = Fixture::new();
        {
            let mut ctx = fx.context();
            let reprobe = run(&mut ctx, Command::new(Opcode::Action, 1, &[0, 0]));
            assert_eq!(reprobe.words()[0], 7);

            let reinit = run(&mut ctx, Command::new(Opcode::Action, 2, &[1, Subsystem::Mmu as u64]));
            assert!(reinit.status.is_ok());
            let bad = run(&mut ctx, Command::new(Opcode::Action, 3, &[1, 99]));
            assert_eq!(bad.status, Status::InvalidArgument);

            let chain = run(&mut ctx, Command::new(Opcode::Action, 4, &[2, 0]));
            assert_eq!(chain.status, Status::NotFound);

            let link = FramerStats {
                frames_rx: 10,
                crc_errors: 2,
                resyncs: 1,
                ..FramerStats::default()
            };
            let stats = ctx.handle(&Command::new(Opcode::Action, 5, &[3, 0]), link);
            assert_eq!(stats.words(), &[10, 3, 2, 2]);

            let unknown = run(&mut ctx, Command::new(Opcode::Action, 6, &[42, 0]));
            assert_eq!(unknown.status, Status::InvalidArgument);
        }
        assert_eq!(fx.platform.inits(), &[Subsystem::Mmu]);
    }
}
