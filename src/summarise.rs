// src/summarise.rs
//
// Single-pass driver over a sorted stats stream. A stack of directory
// frames mirrors the directory currently being walked; every record
// is dispatched to the operations of every open frame (so each frame
// accumulates its whole subtree) plus the flat list of global
// operations. Frames emit via output() in LIFO order as the walk
// leaves their directory.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, MultiError, Result};
use crate::pathtree::{PathArena, PathId};
use crate::stats::{FileInfo, StatsParser};

/// A per-directory or global accumulation over stats records.
pub trait Operation {
    fn add(&mut self, arena: &PathArena, info: &FileInfo) -> Result<()>;

    /// Directory-scoped: called exactly once when the walk leaves the
    /// directory. Global: called once at end of stream.
    fn output(&mut self, arena: &PathArena) -> Result<()>;
}

/// Factory for directory-scoped operations, one fresh instance per
/// frame. Returning None opts the subsystem out of a directory.
pub trait OperationGenerator {
    fn new_operation(
        &mut self,
        arena: &PathArena,
        dir: PathId,
    ) -> Result<Option<Box<dyn Operation>>>;

    /// Abort-time cleanup: close backing stores without committing.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Frame {
    dir: PathId,
    ops: Vec<Box<dyn Operation>>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SummariseStats {
    pub records: u64,
    pub directories: u64,
}

pub struct Summariser {
    arena: PathArena,
    generators: Vec<Box<dyn OperationGenerator>>,
    globals: Vec<Box<dyn Operation>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for Summariser {
    fn default() -> Self {
        Self::new()
    }
}

impl Summariser {
    pub fn new() -> Self {
        Self {
            arena: PathArena::new(),
            generators: Vec::new(),
            globals: Vec::new(),
            cancel: None,
        }
    }

    pub fn add_generator(&mut self, generator: Box<dyn OperationGenerator>) {
        self.generators.push(generator);
    }

    pub fn add_global(&mut self, op: Box<dyn Operation>) {
        self.globals.push(op);
    }

    /// Advisory cancellation, polled between records.
    pub fn set_cancel(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    pub fn arena(&self) -> &PathArena {
        &self.arena
    }

    pub fn summarise<R: BufRead>(&mut self, input: R) -> Result<SummariseStats> {
        let mut parser = StatsParser::new(input);
        let mut stack: Vec<Frame> = Vec::new();
        let mut stats = SummariseStats::default();

        loop {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(self.abort(Error::Cancelled));
                }
            }

            let info = match parser.next_record(&mut self.arena) {
                Ok(Some(info)) => info,
                Ok(None) => break,
                Err(e) => return Err(self.abort(e)),
            };
            stats.records += 1;

            let dir = info.path;
            if stack.last().map(|f| f.dir) != Some(dir) {
                if let Err(e) = self.adjust_stack(&mut stack, dir, &mut stats) {
                    return Err(self.abort(e));
                }
            }

            for frame in stack.iter_mut() {
                for op in frame.ops.iter_mut() {
                    if let Err(e) = op.add(&self.arena, &info) {
                        return Err(self.abort(e));
                    }
                }
            }
            for i in 0..self.globals.len() {
                if let Err(e) = self.globals[i].add(&self.arena, &info) {
                    return Err(self.abort(e));
                }
            }
        }

        while let Some(frame) = stack.pop() {
            if let Err(e) = Self::output_frame(&self.arena, frame) {
                return Err(self.abort(e));
            }
        }
        for i in 0..self.globals.len() {
            if let Err(e) = self.globals[i].output(&self.arena) {
                return Err(self.abort(e));
            }
        }

        info!(
            records = stats.records,
            directories = stats.directories,
            interned = self.arena.len(),
            "summarise complete"
        );
        Ok(stats)
    }

    /// Unwind frames that are not ancestors of `dir`, then push frames
    /// for every ancestor down to `dir` itself.
    fn adjust_stack(
        &mut self,
        stack: &mut Vec<Frame>,
        dir: PathId,
        stats: &mut SummariseStats,
    ) -> Result<()> {
        while let Some(top) = stack.last() {
            if self.arena.is_self_or_ancestor(top.dir, dir) {
                break;
            }
            let frame = stack.pop().unwrap();
            Self::output_frame(&self.arena, frame)?;
        }

        let floor = stack.last().map(|f| f.dir);
        let mut to_push = Vec::new();
        let mut cur = Some(dir);
        while let Some(d) = cur {
            if Some(d) == floor {
                break;
            }
            to_push.push(d);
            cur = self.arena.parent(d);
        }

        for d in to_push.into_iter().rev() {
            let mut ops = Vec::with_capacity(self.generators.len());
            for generator in self.generators.iter_mut() {
                if let Some(op) = generator.new_operation(&self.arena, d)? {
                    ops.push(op);
                }
            }
            debug!(depth = self.arena.depth(d), ops = ops.len(), "open frame");
            stats.directories += 1;
            stack.push(Frame { dir: d, ops });
        }

        Ok(())
    }

    fn output_frame(arena: &PathArena, mut frame: Frame) -> Result<()> {
        for op in frame.ops.iter_mut() {
            op.output(arena)?;
        }
        Ok(())
    }

    /// Close all subsystems without committing, aggregating close
    /// errors behind the original failure.
    fn abort(&mut self, cause: Error) -> Error {
        let mut multi = MultiError::default();
        multi.push(cause);
        for generator in self.generators.iter_mut() {
            if let Err(e) = generator.close() {
                multi.push(e);
            }
        }
        match multi.into_result() {
            Err(e) => e,
            Ok(()) => unreachable!("abort always carries its cause"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;
    use std::sync::atomic::AtomicBool;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        dir: String,
        log: Log,
    }

    impl Operation for Recorder {
        fn add(&mut self, _arena: &PathArena, info: &FileInfo) -> Result<()> {
            self.log.borrow_mut().push(format!(
                "add {} {}",
                self.dir,
                String::from_utf8_lossy(&info.name)
            ));
            Ok(())
        }

        fn output(&mut self, _arena: &PathArena) -> Result<()> {
            self.log.borrow_mut().push(format!("out {}", self.dir));
            Ok(())
        }
    }

    struct RecorderGen {
        log: Log,
        closed: Rc<RefCell<bool>>,
    }

    impl OperationGenerator for RecorderGen {
        fn new_operation(
            &mut self,
            arena: &PathArena,
            dir: PathId,
        ) -> Result<Option<Box<dyn Operation>>> {
            Ok(Some(Box::new(Recorder {
                dir: String::from_utf8_lossy(&arena.path_of(dir)).into_owned(),
                log: self.log.clone(),
            })))
        }

        fn close(&mut self) -> Result<()> {
            *self.closed.borrow_mut() = true;
            Ok(())
        }
    }

    fn run(input: &[u8]) -> (Vec<String>, SummariseStats) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut s = Summariser::new();
        s.add_generator(Box::new(RecorderGen {
            log: log.clone(),
            closed: Rc::new(RefCell::new(false)),
        }));
        let stats = s.summarise(Cursor::new(input.to_vec())).unwrap();
        let entries = log.borrow().clone();
        (entries, stats)
    }

    const STREAM: &[u8] = b"/a/ 0 1 1 9 9 9 d\n\
/a/b/ 0 1 1 9 9 9 d\n\
/a/b/f1 5 1 1 9 9 9 f\n\
/a/c/ 0 1 1 9 9 9 d\n\
/a/c/f2 5 1 1 9 9 9 f\n";

    #[test]
    fn records_dispatch_to_all_open_frames() {
        let (log, stats) = run(STREAM);
        assert_eq!(stats.records, 5);
        // /, /a, /a/b, /a/c
        assert_eq!(stats.directories, 4);

        // f1 hits the root, /a/ and /a/b/ frames
        let f1_adds: Vec<&String> =
            log.iter().filter(|l| l.ends_with("f1")).collect();
        assert_eq!(f1_adds.len(), 3);

        // /a/b/ closes before /a/c/ opens, root closes last
        let out_order: Vec<&String> =
            log.iter().filter(|l| l.starts_with("out")).collect();
        assert_eq!(out_order, vec!["out /a/b/", "out /a/c/", "out /a/", "out /"]);
    }

    #[test]
    fn sibling_records_do_not_cross_frames() {
        let (log, _) = run(STREAM);
        assert!(!log.contains(&"add /a/b/ f2".to_string()));
        assert!(!log.contains(&"add /a/c/ f1".to_string()));
    }

    #[test]
    fn dir_record_reaches_its_own_frame() {
        let (log, _) = run(STREAM);
        assert!(log.contains(&"add /a/b/ b".to_string()));
        assert!(log.contains(&"add /a/ b".to_string()));
    }

    #[test]
    fn global_operations_see_everything_once() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut s = Summariser::new();
        s.add_global(Box::new(Recorder {
            dir: "global".into(),
            log: log.clone(),
        }));
        s.summarise(Cursor::new(STREAM.to_vec())).unwrap();

        let adds = log.borrow().iter().filter(|l| l.starts_with("add")).count();
        assert_eq!(adds, 5);
        assert_eq!(log.borrow().last().unwrap(), "out global");
    }

    #[test]
    fn empty_stream_is_fine() {
        let (log, stats) = run(b"");
        assert!(log.is_empty());
        assert_eq!(stats, SummariseStats::default());
    }

    #[test]
    fn malformed_record_aborts_and_closes() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let closed = Rc::new(RefCell::new(false));
        let mut s = Summariser::new();
        s.add_generator(Box::new(RecorderGen {
            log: log.clone(),
            closed: closed.clone(),
        }));

        let input = b"/a/ 0 1 1 9 9 9 d\n/a/f bad 1 1 9 9 9 f\n";
        let err = s.summarise(Cursor::new(input.to_vec())).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { line: 2, .. }));
        assert!(*closed.borrow());
        // no frame reached output
        assert!(!log.borrow().iter().any(|l| l.starts_with("out")));
    }

    #[test]
    fn cancellation_is_polled() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut s = Summariser::new();
        s.set_cancel(flag);
        let err = s.summarise(Cursor::new(STREAM.to_vec())).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn deep_jump_opens_intermediate_frames() {
        // file arrives without explicit dir records for /x and /x/y
        let (log, stats) = run(b"/x/y/f 1 1 1 9 9 9 f\n");
        assert_eq!(stats.directories, 3);
        assert!(log.contains(&"add /x/y/ f".to_string()));
        assert!(log.contains(&"add / f".to_string()));
    }
}
