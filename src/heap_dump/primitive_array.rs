use crate::*;

/// A primitive array dump.
///
/// Accessors for the contents return `Some` only for the method matching the
/// array's type (e.g. if it's a [PrimitiveArrayType::Float], only `floats()`
/// will be `Some`).
#[derive(CopyGetters)]
pub struct PrimitiveArray<'a> {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    elem_type: PrimitiveArrayType,
    #[get_copy = "pub"]
    num_elements: u32,
    /// Raw big-endian element bytes
    #[get_copy = "pub"]
    contents: &'a [u8],
}

macro_rules! iterator_method {
    ($method_name:tt, $type_variant:tt, $iter_struct:tt) => {
        pub fn $method_name(&self) -> Option<$iter_struct<'a>> {
            match self.elem_type {
                PrimitiveArrayType::$type_variant => Some($iter_struct {
                    iter: CountedIter::new((), self.contents, self.num_elements),
                }),
                _ => None,
            }
        }
    };
}

impl<'a> PrimitiveArray<'a> {
    pub(crate) fn parse(
        input: &'a [u8],
        id_size: IdSize,
        offset: usize,
    ) -> Result<(&'a [u8], PrimitiveArray<'a>)> {
        let trunc =
            |_: nom::Err<nom::error::Error<&[u8]>>| HprofError::Truncated { offset, tag: 0x23 };

        let (input, obj_id) = Id::parse_element(input, id_size).map_err(trunc)?;
        let (input, stack_trace_serial) = number::be_u32(input).map_err(trunc)?;
        let (input, num_elements) = number::be_u32(input).map_err(trunc)?;
        let (input, type_byte) = number::be_u8(input).map_err(trunc)?;

        let elem_type =
            PrimitiveArrayType::from_type_byte(type_byte).ok_or(HprofError::InvalidTypeTag {
                offset,
                tag: type_byte,
            })?;

        let (input, contents) =
            bytes::take((num_elements as usize) * elem_type.size_in_bytes())(input)
                .map_err(trunc)?;

        Ok((
            input,
            PrimitiveArray {
                obj_id,
                stack_trace_serial,
                elem_type,
                num_elements,
                contents,
            },
        ))
    }

    iterator_method!(booleans, Boolean, Booleans);
    iterator_method!(chars, Char, Chars);
    iterator_method!(floats, Float, Floats);
    iterator_method!(doubles, Double, Doubles);
    iterator_method!(bytes, Byte, Bytes);
    iterator_method!(shorts, Short, Shorts);
    iterator_method!(ints, Int, Ints);
    iterator_method!(longs, Long, Longs);
}

impl ParseElement for bool {
    type Ctx = ();

    fn parse_element(input: &[u8], _ctx: ()) -> nom::IResult<&[u8], bool> {
        number::be_u8(input).map(|(input, b)| (input, b != 0))
    }
}

macro_rules! parser_impl {
    ($prim_type:tt, $parser_method:tt) => {
        impl ParseElement for $prim_type {
            type Ctx = ();

            fn parse_element(input: &[u8], _ctx: ()) -> nom::IResult<&[u8], $prim_type> {
                number::$parser_method(input)
            }
        }
    };
}

parser_impl!(u16, be_u16);
parser_impl!(f32, be_f32);
parser_impl!(f64, be_f64);
parser_impl!(i8, be_i8);
parser_impl!(i16, be_i16);
parser_impl!(i32, be_i32);
parser_impl!(i64, be_i64);

macro_rules! iter_struct {
    ($struct_name:ident, $item_type:ty) => {
        pub struct $struct_name<'a> {
            iter: CountedIter<'a, $item_type>,
        }

        impl<'a> Iterator for $struct_name<'a> {
            type Item = ParseResult<'a, $item_type>;

            fn next(&mut self) -> Option<Self::Item> {
                self.iter.next()
            }

            fn size_hint(&self) -> (usize, Option<usize>) {
                self.iter.size_hint()
            }
        }
    };
}

iter_struct!(Booleans, bool);
iter_struct!(Chars, u16);
iter_struct!(Floats, f32);
iter_struct!(Doubles, f64);
iter_struct!(Bytes, i8);
iter_struct!(Shorts, i16);
iter_struct!(Ints, i32);
iter_struct!(Longs, i64);

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, strum_macros::EnumIter)]
pub enum PrimitiveArrayType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl PrimitiveArrayType {
    pub fn from_type_byte(b: u8) -> Option<PrimitiveArrayType> {
        match b {
            0x04 => Some(PrimitiveArrayType::Boolean),
            0x05 => Some(PrimitiveArrayType::Char),
            0x06 => Some(PrimitiveArrayType::Float),
            0x07 => Some(PrimitiveArrayType::Double),
            0x08 => Some(PrimitiveArrayType::Byte),
            0x09 => Some(PrimitiveArrayType::Short),
            0x0A => Some(PrimitiveArrayType::Int),
            0x0B => Some(PrimitiveArrayType::Long),
            _ => None,
        }
    }

    pub fn type_byte(&self) -> u8 {
        match self {
            PrimitiveArrayType::Boolean => 0x04,
            PrimitiveArrayType::Char => 0x05,
            PrimitiveArrayType::Float => 0x06,
            PrimitiveArrayType::Double => 0x07,
            PrimitiveArrayType::Byte => 0x08,
            PrimitiveArrayType::Short => 0x09,
            PrimitiveArrayType::Int => 0x0A,
            PrimitiveArrayType::Long => 0x0B,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            PrimitiveArrayType::Boolean | PrimitiveArrayType::Byte => 1,
            PrimitiveArrayType::Char | PrimitiveArrayType::Short => 2,
            PrimitiveArrayType::Float | PrimitiveArrayType::Int => 4,
            PrimitiveArrayType::Double | PrimitiveArrayType::Long => 8,
        }
    }

    pub fn java_type_name(&self) -> &'static str {
        match self {
            PrimitiveArrayType::Boolean => "boolean",
            PrimitiveArrayType::Char => "char",
            PrimitiveArrayType::Float => "float",
            PrimitiveArrayType::Double => "double",
            PrimitiveArrayType::Byte => "byte",
            PrimitiveArrayType::Short => "short",
            PrimitiveArrayType::Int => "int",
            PrimitiveArrayType::Long => "long",
        }
    }
}
