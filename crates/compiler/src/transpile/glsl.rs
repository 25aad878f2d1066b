//! GLSL vocabulary of the target dialect

/// Language keywords and qualifiers
const KEYWORDS: &[&str] = &[
    "attribute", "const", "uniform", "varying", "buffer", "shared", "coherent", "volatile", "restrict", "readonly", "writeonly", "layout", "centroid", "flat", "smooth",
    "noperspective", "patch", "sample", "break", "continue", "do", "for", "while", "switch", "case", "default", "if", "else", "subroutine", "in", "out", "inout", "true",
    "false", "invariant", "precise", "discard", "return", "struct", "precision", "highp", "mediump", "lowp", "defined",
];

/// Built-in type names
const TYPES: &[&str] = &[
    "void", "bool", "int", "uint", "float", "double", "vec2", "vec3", "vec4", "dvec2", "dvec3", "dvec4", "bvec2", "bvec3", "bvec4", "ivec2", "ivec3", "ivec4", "uvec2",
    "uvec3", "uvec4", "mat2", "mat3", "mat4", "mat2x2", "mat2x3", "mat2x4", "mat3x2", "mat3x3", "mat3x4", "mat4x2", "mat4x3", "mat4x4", "sampler2D", "sampler3D",
    "samplerCube", "sampler2DArray", "sampler2DShadow", "texture2D", "texture3D", "textureCube", "sampler", "samplerShadow", "isampler2D", "usampler2D",
];

/// Built-in functions of GLSL 4.50 that shaders in this format call
const FUNCTIONS: &[&str] = &[
    "radians", "degrees", "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "asinh", "acosh", "atanh", "pow", "exp", "log", "exp2", "log2", "sqrt",
    "inversesqrt", "abs", "sign", "floor", "trunc", "round", "roundEven", "ceil", "fract", "mod", "modf", "min", "max", "clamp", "mix", "step", "smoothstep", "isnan",
    "isinf", "floatBitsToInt", "floatBitsToUint", "intBitsToFloat", "uintBitsToFloat", "fma", "frexp", "ldexp", "packUnorm2x16", "packSnorm2x16", "packUnorm4x8",
    "packSnorm4x8", "unpackUnorm2x16", "unpackSnorm2x16", "unpackUnorm4x8", "unpackSnorm4x8", "packHalf2x16", "unpackHalf2x16", "length", "distance", "dot",
    "cross", "normalize", "faceforward", "reflect", "refract", "matrixCompMult", "outerProduct", "transpose", "determinant", "inverse", "lessThan",
    "lessThanEqual", "greaterThan", "greaterThanEqual", "equal", "notEqual", "any", "all", "not", "bitfieldExtract", "bitfieldInsert", "bitfieldReverse",
    "bitCount", "findLSB", "findMSB", "textureSize", "textureQueryLod", "textureQueryLevels", "texture", "textureProj", "textureLod", "textureOffset",
    "texelFetch", "texelFetchOffset", "textureProjOffset", "textureLodOffset", "textureProjLod", "textureProjLodOffset", "textureGrad", "textureGradOffset",
    "textureProjGrad", "textureGather", "textureGatherOffset", "dFdx", "dFdy", "dFdxFine", "dFdyFine", "dFdxCoarse", "dFdyCoarse", "fwidth", "fwidthFine",
    "fwidthCoarse",
];

/// Words that are reserved for future use and may not be identifiers
const RESERVED: &[&str] = &[
    "common", "partition", "active", "asm", "class", "union", "enum", "typedef", "template", "this", "resource", "goto", "inline", "noinline", "public", "static",
    "extern", "external", "interface", "long", "short", "half", "fixed", "unsigned", "superp", "input", "output", "filter", "sizeof", "cast", "namespace", "using",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

pub fn is_builtin_type(word: &str) -> bool {
    TYPES.contains(&word)
}

pub fn is_builtin_function(word: &str) -> bool {
    FUNCTIONS.contains(&word)
}

/// Returns true if a macro with this name would collide with the target language
pub fn is_reserved(word: &str) -> bool {
    is_keyword(word) || is_builtin_type(word) || is_builtin_function(word) || RESERVED.contains(&word) || word.starts_with("gl_")
}

/// Returns true for identifiers that never need resolution: keywords, types, built-in
/// functions and `gl_` variables
pub fn is_language_symbol(word: &str) -> bool {
    is_keyword(word) || is_builtin_type(word) || is_builtin_function(word) || word.starts_with("gl_")
}

/// Qualifiers that may precede a declaration's type
pub fn is_qualifier(word: &str) -> bool {
    matches!(
        word,
        "const" | "uniform" | "in" | "out" | "inout" | "varying" | "attribute" | "flat" | "smooth" | "noperspective" | "centroid" | "invariant" | "precise" | "highp" | "mediump" | "lowp"
    )
}

/// Returns true for precision qualifiers, which the target dialect ignores
pub fn is_precision(word: &str) -> bool {
    matches!(word, "highp" | "mediump" | "lowp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_words() {
        assert!(is_reserved("texture"));
        assert!(is_reserved("mix"));
        assert!(is_reserved("float"));
        assert!(is_reserved("gl_FragColor"));
        assert!(is_reserved("filter"));
        assert!(!is_reserved("COMPAT_TEXTURE"));
        assert!(!is_reserved("GAMMA"));
        assert!(!is_reserved("texture2DLod"));
    }
}
