use crate::ir::LocalVar;

/// Tuples of consecutively numbered registers, so fixtures can name the
/// registers they use: `|(a, b, sum)| ...` receives `%t0`, `%t1`, `%t2`.
pub trait VarSeq {
    fn size() -> usize;
    fn seq() -> Self;
}

macro_rules! local_var_of {
    ($idx:tt) => {
        LocalVar
    };
}

macro_rules! gen_var_seq {
    ($size:tt; $($idx:tt),*) => {
        impl VarSeq for ($(local_var_of!($idx),)*) {
            fn size() -> usize {
                $size
            }
            fn seq() -> Self {
                ($(LocalVar($idx),)*)
            }
        }
    };
}

gen_var_seq!(0;);
gen_var_seq!(1; 0);
gen_var_seq!(2; 0, 1);
gen_var_seq!(3; 0, 1, 2);
gen_var_seq!(4; 0, 1, 2, 3);
gen_var_seq!(5; 0, 1, 2, 3, 4);
gen_var_seq!(6; 0, 1, 2, 3, 4, 5);
gen_var_seq!(7; 0, 1, 2, 3, 4, 5, 6);
gen_var_seq!(8; 0, 1, 2, 3, 4, 5, 6, 7);
gen_var_seq!(9; 0, 1, 2, 3, 4, 5, 6, 7, 8);
gen_var_seq!(10; 0, 1, 2, 3, 4, 5, 6, 7, 8, 9);

#[test]
fn test_var_seq() {
    assert_eq!(<(LocalVar, LocalVar, LocalVar) as VarSeq>::size(), 3);
    assert_eq!(
        <(LocalVar, LocalVar, LocalVar) as VarSeq>::seq(),
        (LocalVar(0), LocalVar(1), LocalVar(2))
    );
    assert_eq!(<() as VarSeq>::size(), 0);
}
