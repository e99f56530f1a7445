use arbitrary::Unstructured;
use arbtest::{arbitrary, arbtest};
use immutable_vector::Vector;
use pretty_assertions::assert_eq;

// The model of a vector is the full backing store (which may extend past the
// visible size, since shrinking doesn't drop anything), together with the
// visible window into it.
#[derive(Clone, Debug, Default)]
struct Model {
    store: Vec<Option<u32>>,
    offset: usize,
    size: usize,
}

impl Model {
    fn visible(&self) -> Vec<Option<u32>> {
        (self.offset..self.offset + self.size)
            .map(|pos| self.store.get(pos).copied().flatten())
            .collect()
    }

    fn write(&mut self, index: usize, x: u32) {
        let pos = self.offset + index;
        if self.store.len() <= pos {
            self.store.resize(pos + 1, None);
        }
        self.store[pos] = Some(x);
    }
}

#[derive(arbitrary::Arbitrary, Debug)]
enum Op {
    Append(u32),
    Set(u16, u32),
    Resize(u16),
    Slice(u16, u16),
    // Keep the current version around, to check later that it didn't change.
    Snapshot,
}

impl Op {
    fn apply_to_model(&self, model: &mut Model) {
        match *self {
            Op::Append(x) => {
                model.size += 1;
                model.write(model.size - 1, x);
            }
            Op::Set(idx, x) => {
                if model.size > 0 {
                    model.write(usize::from(idx) % model.size, x);
                }
            }
            Op::Resize(size) => {
                if size == 0 {
                    model.offset = 0;
                }
                model.size = size.into();
            }
            Op::Slice(start, len) => {
                let start = usize::from(start);
                let end = start + usize::from(len);
                if start >= model.size || len == 0 {
                    *model = Model::default();
                } else {
                    model.offset += start;
                    model.size = end.min(model.size) - start;
                }
            }
            Op::Snapshot => {}
        }
    }

    fn apply_to_vector(
        &self,
        vec: &Vector<u32>,
        snapshots: &mut Vec<(Vector<u32>, Vec<Option<u32>>)>,
    ) -> Vector<u32> {
        match *self {
            Op::Append(x) => vec.append(x),
            Op::Set(idx, x) => {
                if vec.is_empty() {
                    vec.clone()
                } else {
                    vec.set(usize::from(idx) % vec.size(), x)
                }
            }
            Op::Resize(size) => vec.resize(size.into()),
            Op::Slice(start, len) => {
                let start = usize::from(start);
                vec.slice(start, start + usize::from(len))
            }
            Op::Snapshot => {
                let contents = vec.iter().map(|x| x.copied()).collect();
                snapshots.push((vec.clone(), contents));
                vec.clone()
            }
        }
    }
}

// u.arbitrary() generates very short vecs by default:
// https://github.com/matklad/arbtest/issues/8
fn arb_vec(u: &mut Unstructured<'_>) -> arbitrary::Result<Vec<u32>> {
    let len = u.arbitrary_len::<u32>()?;
    std::iter::from_fn(|| Some(u.arbitrary::<u32>()))
        .take(len)
        .collect()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn operations() {
    init_logging();
    arbtest(|u| {
        let initial = arb_vec(u)?;
        let mut model = Model {
            store: initial.iter().copied().map(Some).collect(),
            offset: 0,
            size: initial.len(),
        };
        let mut vector: Vector<u32> = initial.iter().copied().collect();
        let mut snapshots = Vec::new();
        let ops: Vec<Op> = u.arbitrary()?;

        for op in ops {
            op.apply_to_model(&mut model);
            vector = op.apply_to_vector(&vector, &mut snapshots);

            vector.check_invariants();
            assert_eq!(vector.size(), model.size);
            assert_eq!(
                vector.iter().map(|x| x.copied()).collect::<Vec<_>>(),
                model.visible()
            );
        }

        for (snapshot, contents) in snapshots {
            assert_eq!(
                snapshot.iter().map(|x| x.copied()).collect::<Vec<_>>(),
                contents
            );
        }

        Ok(())
    });
}

#[test]
fn slice_correctness() {
    arbtest(|u| {
        let len: usize = u.int_in_range(1..=3000)?;
        let vector: Vector<usize> = (0..len).collect();
        let a = u.int_in_range(0..=len - 1)?;
        let b = u.int_in_range(a..=len)?;

        let slice = vector.slice(a, b);
        assert_eq!(slice.size(), b - a);
        for j in 0..b - a {
            assert_eq!(slice.get(j), Some(&(a + j)));
        }

        Ok(())
    });
}

#[test]
fn sparse_after_resize() {
    arbtest(|u| {
        let len: usize = u.int_in_range(0..=50_000)?;
        let vector: Vector<u32> = Vector::new().resize(len);
        if len > 0 {
            let idx = u.int_in_range(0..=len - 1)?;
            assert_eq!(vector.get(idx), None);
        }
        assert_eq!(vector.iter().len(), len);

        Ok(())
    });
}

#[test]
fn concurrent_readers() {
    let base: Vector<u64> = (0..10_000).collect();
    let versions: Vec<Vector<u64>> = (0..4u64)
        .map(|k| {
            let mut v = base.clone();
            for i in (0..10_000).step_by(7) {
                v.set_mut(i, i as u64 * k);
            }
            v
        })
        .collect();

    std::thread::scope(|s| {
        for (k, v) in versions.iter().enumerate() {
            let base = &base;
            s.spawn(move || {
                for i in 0..10_000 {
                    let expected = if i % 7 == 0 {
                        i as u64 * k as u64
                    } else {
                        i as u64
                    };
                    assert_eq!(v.get(i), Some(&expected));
                    assert_eq!(base.get(i), Some(&(i as u64)));
                }
            });
        }
    });
}
