//! Handles to secret-shared values.
//!
//! A [`Secret`] carries this party's share of one value together with everything needed to
//! operate on it: the party context, the share width and the task the value's messages are tagged
//! with. All parties run the same program on their handles. The owner of a value creates it with
//! [`Secret::with_value`] and everybody calls [`Secret::share`]. Compute parties then evaluate
//! gates, while clients just carry placeholders along until [`Secret::reconstruct`] delivers the
//! result to them.
//!
//! ```no_run
//! # use duet::{BoolSecret, Error, Party};
//! # async fn run(party: Party) -> Result<(), Error> {
//! let client = 2;
//! let value = if party.rank() == client { 5 } else { 0 };
//! let x = BoolSecret::new(&party, 64, 7)?.with_value(value).share(client).await?;
//! let y = BoolSecret::new(&party, 64, 7)?.with_value(10).share(client).await?;
//! let less = x.less_than(&y).await?;
//! if let Some(result) = less.reconstruct(client).await? {
//!     assert_eq!(result, 1);
//! }
//! # Ok(())
//! # }
//! ```

use std::{fmt, marker::PhantomData};

use crate::{
    batch::{self, Op, Operands},
    error::Error,
    gates::{self, Sharing},
    party::Party,
    ring,
};

mod sealed {
    pub trait Sealed {}
}

/// The kind of sharing of a [`Secret`], either [`Arith`] or [`Bool`].
pub trait Kind: sealed::Sealed + fmt::Debug + Clone + Copy + Send + Sync + 'static {
    #[doc(hidden)]
    const ADDITIVE: bool;
}

/// Additive shares modulo `2^width`.
#[derive(Debug, Clone, Copy)]
pub struct Arith;

/// Bitwise XOR shares.
#[derive(Debug, Clone, Copy)]
pub struct Bool;

impl sealed::Sealed for Arith {}
impl sealed::Sealed for Bool {}

impl Kind for Arith {
    const ADDITIVE: bool = true;
}

impl Kind for Bool {
    const ADDITIVE: bool = false;
}

fn sharing<K: Kind>() -> Sharing {
    if K::ADDITIVE {
        Sharing::Arith
    } else {
        Sharing::Bool
    }
}

/// Where the share of a handle comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Shared by an owner or computed from shared values.
    Shared,
    /// An output of an oblivious transfer, which has no counterpart to reconstruct with.
    Correlated,
}

impl Origin {
    fn join(self, other: Origin) -> Origin {
        if self == Origin::Correlated || other == Origin::Correlated {
            Origin::Correlated
        } else {
            Origin::Shared
        }
    }
}

/// One party's handle to a secret-shared value.
#[derive(Clone)]
pub struct Secret<K: Kind> {
    party: Party,
    width: u32,
    task: u32,
    share: u64,
    origin: Origin,
    kind: PhantomData<K>,
}

/// A value shared additively modulo `2^width`.
pub type ArithSecret = Secret<Arith>;

/// A value shared bitwise with XOR.
pub type BoolSecret = Secret<Bool>;

impl<K: Kind> fmt::Debug for Secret<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("additive", &K::ADDITIVE)
            .field("rank", &self.party.rank())
            .field("width", &self.width)
            .field("task", &self.task)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl<K: Kind> Secret<K> {
    /// Creates a handle holding zero, with messages tagged by `task`.
    pub fn new(party: &Party, width: u32, task: u32) -> Result<Self, Error> {
        ring::check_width(width)?;
        Ok(Self {
            party: party.clone(),
            width,
            task,
            share: 0,
            origin: Origin::Shared,
            kind: PhantomData,
        })
    }

    /// Sets the plaintext value held by the owner before calling [`Secret::share`].
    pub fn with_value(mut self, value: u64) -> Self {
        self.share = ring::ring(value, self.width);
        self
    }

    /// The share width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// The task the messages of this value are tagged with.
    pub fn task(&self) -> u32 {
        self.task
    }

    /// This party's share. Zero on clients.
    pub fn local_share(&self) -> u64 {
        self.share
    }

    /// Where the share comes from.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    fn derive<L: Kind>(&self, width: u32, share: u64, origin: Origin) -> Secret<L> {
        Secret {
            party: self.party.clone(),
            width,
            task: self.task,
            share: ring::ring(share, width),
            origin,
            kind: PhantomData,
        }
    }

    fn check_operand<L: Kind>(&self, other: &Secret<L>) -> Result<(), Error> {
        if other.width != self.width {
            return Err(Error::InvalidWidth(other.width));
        }
        Ok(())
    }

    /// Evaluates an interactive gate with this handle's task on compute parties, clients get a
    /// zero placeholder.
    async fn apply(&self, op: Op, width: u32, operands: Operands) -> Result<u64, Error> {
        if !self.party.is_server() {
            return Ok(0);
        }
        let mut task = self.party.task(self.task)?;
        let result = batch::run(&self.party, &mut task, op, width, operands).await?;
        result.first().copied().ok_or(Error::LengthMismatch {
            expected: 1,
            actual: 0,
        })
    }

    /// Shares the value set by `owner` between the compute parties.
    ///
    /// Every party calls this on a handle of the same width and task, the owner on the handle
    /// holding the value.
    pub async fn share(&self, owner: usize) -> Result<Self, Error> {
        let mut task = self.party.task(self.task)?;
        let shares = gates::share(
            &self.party,
            &mut task,
            sharing::<K>(),
            self.width,
            owner,
            &[self.share],
        )
        .await?;
        let share = shares.first().copied().unwrap_or_default();
        Ok(self.derive(self.width, share, Origin::Shared))
    }

    /// Opens the value to `receiver`, which gets `Some(value)`. All other parties get `None`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotReconstructible`] for handles derived from OT correlations.
    pub async fn reconstruct(&self, receiver: usize) -> Result<Option<u64>, Error> {
        if self.origin == Origin::Correlated {
            return Err(Error::NotReconstructible);
        }
        let mut task = self.party.task(self.task)?;
        let opened = gates::reconstruct(
            &self.party,
            &mut task,
            sharing::<K>(),
            self.width,
            receiver,
            &[self.share],
        )
        .await?;
        Ok(opened.and_then(|v| v.first().copied()))
    }
}

impl Secret<Bool> {
    /// Wraps a share obtained from an oblivious transfer, which can be computed with but not
    /// reconstructed.
    pub fn from_correlation(party: &Party, width: u32, task: u32, share: u64) -> Result<Self, Error> {
        let mut secret = Self::new(party, width, task)?.with_value(share);
        secret.origin = Origin::Correlated;
        Ok(secret)
    }

    /// Bitwise XOR.
    pub fn xor(&self, other: &Self) -> Result<Self, Error> {
        self.check_operand(other)?;
        Ok(self.derive(self.width, self.share ^ other.share, self.origin.join(other.origin)))
    }

    /// Bitwise NOT.
    pub fn not(&self) -> Self {
        let share = gates::not(self.party.rank(), &[self.share], self.width)[0];
        self.derive(self.width, share, self.origin)
    }

    /// Bitwise AND.
    pub async fn and(&self, other: &Self) -> Result<Self, Error> {
        self.check_operand(other)?;
        let share = self
            .apply(Op::And, self.width, Operands::binary(vec![self.share], vec![other.share]))
            .await?;
        Ok(self.derive(self.width, share, self.origin.join(other.origin)))
    }

    /// Bitwise OR.
    pub async fn or(&self, other: &Self) -> Result<Self, Error> {
        self.check_operand(other)?;
        let share = self
            .apply(Op::Or, self.width, Operands::binary(vec![self.share], vec![other.share]))
            .await?;
        Ok(self.derive(self.width, share, self.origin.join(other.origin)))
    }

    /// Unsigned `self < other`, as a 1-bit value.
    pub async fn less_than(&self, other: &Self) -> Result<Self, Error> {
        self.check_operand(other)?;
        let share = self
            .apply(
                Op::LessThan,
                self.width,
                Operands::binary(vec![self.share], vec![other.share]),
            )
            .await?;
        Ok(self.derive(1, share, self.origin.join(other.origin)))
    }

    /// `self == other`, as a 1-bit value.
    pub async fn equal(&self, other: &Self) -> Result<Self, Error> {
        self.check_operand(other)?;
        let share = self
            .apply(Op::Equal, self.width, Operands::binary(vec![self.share], vec![other.share]))
            .await?;
        Ok(self.derive(1, share, self.origin.join(other.origin)))
    }

    /// Selects `x` if this 1-bit condition is set and `y` otherwise.
    pub async fn mux(&self, x: &Self, y: &Self) -> Result<Self, Error> {
        if self.width != 1 {
            return Err(Error::InvalidWidth(self.width));
        }
        x.check_operand(y)?;
        let share = self
            .apply(
                Op::Mux,
                x.width,
                Operands::select(vec![self.share], vec![x.share], vec![y.share]),
            )
            .await?;
        let origin = self.origin.join(x.origin).join(y.origin);
        Ok(self.derive(x.width, share, origin))
    }

    /// Selects the additively shared `x` if this 1-bit condition is set and `y` otherwise.
    pub async fn mux_arith(&self, x: &ArithSecret, y: &ArithSecret) -> Result<ArithSecret, Error> {
        if self.width != 1 {
            return Err(Error::InvalidWidth(self.width));
        }
        x.check_operand(y)?;
        let share = self
            .apply(
                Op::ArithMux,
                x.width,
                Operands::select(vec![self.share], vec![x.share], vec![y.share]),
            )
            .await?;
        let origin = self.origin.join(x.origin).join(y.origin);
        Ok(self.derive(x.width, share, origin))
    }

    /// Converts to additive shares of the same width.
    pub async fn to_arith(&self) -> Result<ArithSecret, Error> {
        let share = self
            .apply(Op::BoolToArith, self.width, Operands::unary(vec![self.share]))
            .await?;
        Ok(self.derive(self.width, share, self.origin))
    }
}

impl Secret<Arith> {
    /// Addition modulo `2^width`.
    pub fn add(&self, other: &Self) -> Result<Self, Error> {
        self.check_operand(other)?;
        let share = ring::add(self.share, other.share, self.width);
        Ok(self.derive(self.width, share, self.origin.join(other.origin)))
    }

    /// Subtraction modulo `2^width`.
    pub fn sub(&self, other: &Self) -> Result<Self, Error> {
        self.check_operand(other)?;
        let share = ring::sub(self.share, other.share, self.width);
        Ok(self.derive(self.width, share, self.origin.join(other.origin)))
    }

    /// Negation modulo `2^width`.
    pub fn neg(&self) -> Self {
        self.derive(self.width, ring::neg(self.share, self.width), self.origin)
    }

    /// Multiplication modulo `2^width`.
    pub async fn mul(&self, other: &Self) -> Result<Self, Error> {
        self.check_operand(other)?;
        let share = self
            .apply(Op::Mul, self.width, Operands::binary(vec![self.share], vec![other.share]))
            .await?;
        Ok(self.derive(self.width, share, self.origin.join(other.origin)))
    }

    /// Signed `self < other`, as a 1-bit XOR-shared value.
    pub async fn less_than(&self, other: &Self) -> Result<BoolSecret, Error> {
        self.check_operand(other)?;
        let share = self
            .apply(
                Op::ArithLessThan,
                self.width,
                Operands::binary(vec![self.share], vec![other.share]),
            )
            .await?;
        Ok(self.derive(1, share, self.origin.join(other.origin)))
    }

    /// `self == other`, as a 1-bit XOR-shared value.
    pub async fn equal(&self, other: &Self) -> Result<BoolSecret, Error> {
        self.check_operand(other)?;
        let share = self
            .apply(Op::ArithEqual, self.width, Operands::binary(vec![self.share], vec![other.share]))
            .await?;
        Ok(self.derive(1, share, self.origin.join(other.origin)))
    }

    /// Converts to XOR shares of the same width.
    pub async fn to_bool(&self) -> Result<BoolSecret, Error> {
        let share = self
            .apply(Op::ArithToBool, self.width, Operands::unary(vec![self.share]))
            .await?;
        Ok(self.derive(self.width, share, self.origin))
    }
}

/// Sorts `secrets` in place with a bitonic network, with messages tagged by `task`.
///
/// All handles must belong to the same party and have the same width. XOR-shared values are
/// ordered as unsigned numbers, additively shared ones as two's complement numbers. Clients call
/// this too and keep their placeholders.
pub async fn sort<K: Kind>(secrets: &mut [Secret<K>], ascending: bool, task: u32) -> Result<(), Error> {
    let Some(first) = secrets.first() else {
        return Ok(());
    };
    let party = first.party.clone();
    let width = first.width;
    if let Some(other) = secrets.iter().find(|s| s.width != width) {
        return Err(Error::InvalidWidth(other.width));
    }
    if !party.is_server() {
        return Ok(());
    }
    let mut shares: Vec<u64> = secrets.iter().map(|s| s.share).collect();
    let mut cursor = party.task(task)?;
    crate::sort::network(&party, &mut cursor, sharing::<K>(), width, &mut shares, ascending).await?;
    let origin = secrets
        .iter()
        .fold(Origin::Shared, |acc, s| acc.join(s.origin));
    for (secret, share) in secrets.iter_mut().zip(shares) {
        secret.share = share;
        secret.origin = origin;
    }
    Ok(())
}
